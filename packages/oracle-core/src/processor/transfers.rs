use std::collections::HashSet;
use std::sync::Arc;

use alloy_primitives::Address;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::affirmation_requests::affirmation_job;
use super::{run_batch, EventProcessor};
use crate::context::BridgeContext;
use crate::contracts::{erc677_transfer_data, EventKind, HomeBridge, TokenTransfer};
use crate::message::ADDRESS_LEN;
use crate::types::{ChainEvent, DispatchJob};
use crate::Result;

/// foreign 代币 `Transfer`：转入 foreign bridge 的代币在 home bridge 上确认
pub struct Transfers {
    ctx: Arc<BridgeContext>,
}

impl Transfers {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    /// 同一笔交易只处理第一条转账
    fn unique(events: Vec<ChainEvent>) -> Vec<ChainEvent> {
        let total = events.len();
        let mut seen = HashSet::new();
        let unique: Vec<_> = events.into_iter().filter(|e| seen.insert(e.transaction_hash)).collect();
        debug!(total, unique = unique.len(), "Filtered Transfer events");
        unique
    }

    /// 配置的桥对，或注册表里 foreign bridge 相同的映射
    async fn home_bridge_for(&self, foreign_bridge: Address) -> Result<Option<HomeBridge>> {
        let ctx = &self.ctx;
        if foreign_bridge == ctx.foreign.address() {
            return Ok(Some(ctx.home.at(ctx.home.address())));
        }
        let mapping = ctx.registry.find_by_foreign_bridge(foreign_bridge).await?;
        Ok(mapping.map(|m| ctx.home.at(m.home_bridge)))
    }

    /// ERC677 转账附带的地址优先，否则退回转出方
    async fn recipient(&self, event: &ChainEvent, transfer: &TokenTransfer) -> Result<Address> {
        let logs = self.ctx.foreign.chain().transaction_logs(event.transaction_hash).await?;
        let from_data = erc677_transfer_data(&logs, event.address)
            .into_iter()
            .filter(|data| data.len() == ADDRESS_LEN)
            .last()
            .map(|data| Address::from_slice(&data));
        Ok(from_data.unwrap_or(transfer.from))
    }

    async fn handle(&self, event: ChainEvent) -> Result<Option<DispatchJob>> {
        let transfer = TokenTransfer::from_log(&event)?;
        info!(
            from = %transfer.from,
            to = %transfer.to,
            value = %transfer.value,
            token = %event.address,
            "Processing transfer {}",
            event.transaction_hash
        );

        let Some(home) = self.home_bridge_for(transfer.to).await? else {
            warn!(
                token = %event.address,
                foreign_bridge = %transfer.to,
                "Skipping transfer {}, no home bridge for this foreign bridge",
                event.transaction_hash
            );
            return Ok(None);
        };
        let recipient = self.recipient(&event, &transfer).await?;
        debug!(%recipient, "Recipient resolved");

        affirmation_job(&self.ctx, &home, recipient, transfer.value, event.transaction_hash)
            .await
            .map(Some)
    }
}

#[async_trait]
impl EventProcessor for Transfers {
    fn kind(&self) -> EventKind {
        EventKind::Transfer
    }

    async fn process(&self, events: Vec<ChainEvent>, _current_block: u64) -> Result<Vec<DispatchJob>> {
        let events = Self::unique(events);
        run_batch(self.kind(), events, self.ctx.max_concurrent_events, |e| self.handle(e)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::IHomeBridge;
    use crate::signer::ValidatorSigner;
    use crate::test_utils::{FakeChain, FOREIGN_BRIDGE, FOREIGN_TOKEN, HOME_BRIDGE};
    use crate::types::BridgeMapping;
    use crate::Error;
    use alloy_primitives::{address, Bytes, B256, U256};
    use alloy_sol_types::SolCall;

    const SENDER: Address = address!("0000000000000000000000000000000000000051");

    async fn setup() -> (FakeChain, Arc<BridgeContext>) {
        let fake = FakeChain::new();
        let me = ValidatorSigner::random();
        fake.add_home_validator(me.address());
        let ctx = fake.context(me).await;
        (fake, ctx)
    }

    fn affirmation(job: &DispatchJob) -> IHomeBridge::executeAffirmationCall {
        IHomeBridge::executeAffirmationCall::abi_decode(&job.data).unwrap()
    }

    #[tokio::test]
    async fn test_transfer_to_bridge_is_affirmed_for_sender() {
        let (fake, ctx) = setup().await;
        let event = fake.token_transfer(FOREIGN_TOKEN, SENDER, FOREIGN_BRIDGE, U256::from(25u64), 5);

        let jobs = Transfers::new(ctx).process(vec![event.clone()], 10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].to, HOME_BRIDGE);
        assert_eq!(jobs[0].transaction_reference, event.transaction_hash);
        let call = affirmation(&jobs[0]);
        assert_eq!(call.recipient, SENDER);
        assert_eq!(call.value, U256::from(25u64));
        assert_eq!(call.transactionHash, event.transaction_hash);
    }

    #[tokio::test]
    async fn test_erc677_data_overrides_recipient() {
        let (fake, ctx) = setup().await;
        let target = Address::repeat_byte(0x77);
        let event = fake.token_transfer(FOREIGN_TOKEN, SENDER, FOREIGN_BRIDGE, U256::from(25u64), 5);
        fake.erc677_transfer(&event, Bytes::copy_from_slice(target.as_slice()));

        let jobs = Transfers::new(ctx).process(vec![event], 10).await.unwrap();
        assert_eq!(affirmation(&jobs[0]).recipient, target);
    }

    #[tokio::test]
    async fn test_erc677_data_that_is_not_an_address_is_ignored() {
        let (fake, ctx) = setup().await;
        let event = fake.token_transfer(FOREIGN_TOKEN, SENDER, FOREIGN_BRIDGE, U256::from(25u64), 5);
        fake.erc677_transfer(&event, Bytes::from_static(b"memo"));

        let jobs = Transfers::new(ctx).process(vec![event], 10).await.unwrap();
        assert_eq!(affirmation(&jobs[0]).recipient, SENDER);
    }

    #[tokio::test]
    async fn test_transfer_elsewhere_is_skipped() {
        let (fake, ctx) = setup().await;
        let event = fake.token_transfer(FOREIGN_TOKEN, SENDER, Address::repeat_byte(0x99), U256::from(1u64), 5);

        let jobs = Transfers::new(ctx).process(vec![event], 10).await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_registered_bridge_routes_to_its_home_bridge() {
        let (fake, ctx) = setup().await;
        let mapping = BridgeMapping {
            key: B256::repeat_byte(3),
            home_bridge: Address::repeat_byte(0xa9),
            home_token: Address::repeat_byte(0xaa),
            home_start_block: 1,
            foreign_bridge: Address::repeat_byte(0xb9),
            foreign_token: Address::repeat_byte(0xba),
            foreign_start_block: 1,
        };
        ctx.registry.upsert(&mapping).await.unwrap();
        let event = fake.token_transfer(mapping.foreign_token, SENDER, mapping.foreign_bridge, U256::from(3u64), 5);

        let jobs = Transfers::new(ctx).process(vec![event], 10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].to, mapping.home_bridge);
    }

    #[tokio::test]
    async fn test_one_job_per_transaction() {
        let (fake, ctx) = setup().await;
        let event = fake.token_transfer(FOREIGN_TOKEN, SENDER, FOREIGN_BRIDGE, U256::from(25u64), 5);
        let mut again = event.clone();
        again.log_index += 1;

        let jobs = Transfers::new(ctx).process(vec![event, again], 10).await.unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_receipt_failure_fails_the_batch() {
        let (fake, ctx) = setup().await;
        let event = fake.token_transfer(FOREIGN_TOKEN, SENDER, FOREIGN_BRIDGE, U256::from(25u64), 5);
        fake.set_foreign_down(true);

        let result = Transfers::new(ctx).process(vec![event], 10).await;
        assert!(matches!(result, Err(Error::Rpc(_))));
    }
}
