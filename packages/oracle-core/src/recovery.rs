//! 人工恢复：按区块范围列出 home 链上已收齐签名的消息，并对未中继的消息手动补发
//!
//! 补发时不做负责人检查，任何验证者都可以代为中继。

use alloy_primitives::{Address, B256};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregator::collect;
use crate::context::BridgeContext;
use crate::contracts::{CollectedSignatures, EventKind};
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::estimator::estimate_relay;
use crate::message::{classify_then_decode, CrossChainMessage};
use crate::types::{ChainEvent, DispatchJob, LogFilter};
use crate::{Error, Result};

/// 一条 `CollectedSignatures` 事件及其消息的当前状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInfo {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub home_bridge: Address,
    pub foreign_bridge: Address,
    pub message_hash: B256,
    pub number_of_collected_signatures: u64,
    pub message: CrossChainMessage,
    pub relayed: bool,
}

/// 列出消息时的筛选条件，`None` 表示不筛选
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub relayed: Option<bool>,
    pub new_set: Option<bool>,
}

impl MessageFilter {
    fn matches(&self, info: &MessageInfo) -> bool {
        self.relayed.map_or(true, |r| r == info.relayed)
            && self.new_set.map_or(true, |n| n == info.message.is_new_set())
    }
}

async fn home_bridges(ctx: &BridgeContext) -> Result<Vec<Address>> {
    let mut addresses = vec![ctx.home.address()];
    for mapping in ctx.registry.all().await? {
        if !addresses.contains(&mapping.home_bridge) {
            addresses.push(mapping.home_bridge);
        }
    }
    Ok(addresses)
}

async fn inspect(ctx: &BridgeContext, event: ChainEvent) -> Result<MessageInfo> {
    let collected = CollectedSignatures::from_log(&event)?;
    let home = ctx.home.at(event.address);
    let foreign = ctx.foreign_bridge_for(event.address).await?;
    let raw = home.message(collected.message_hash).await?;
    let message = classify_then_decode(&raw, ctx.expected_message_length)?;
    let relayed = foreign.relayed_messages(message.tx_hash()).await?;
    Ok(MessageInfo {
        transaction_hash: event.transaction_hash,
        block_number: event.block_number,
        home_bridge: event.address,
        foreign_bridge: foreign.address(),
        message_hash: collected.message_hash,
        number_of_collected_signatures: collected.number_of_collected_signatures,
        message,
        relayed,
    })
}

/// 查询 `[from_block, to_block]` 内的 `CollectedSignatures` 消息，按区块顺序返回
pub async fn find_messages(
    ctx: &BridgeContext,
    from_block: u64,
    to_block: u64,
    filter: MessageFilter,
) -> Result<Vec<MessageInfo>> {
    if from_block > to_block {
        return Err(Error::Config(format!(
            "invalid block range {from_block}..{to_block}"
        )));
    }
    let log_filter = LogFilter {
        addresses: home_bridges(ctx).await?,
        topic0: Some(EventKind::CollectedSignatures.topic0()),
        from_block,
        to_block,
    };
    let mut events = ctx.home.chain().get_logs(&log_filter).await?;
    events.sort_by_key(|e| (e.block_number, e.log_index));
    info!(from_block, to_block, events = events.len(), "Found CollectedSignatures events");

    let messages: Vec<MessageInfo> = futures::stream::iter(events)
        .map(|event| inspect(ctx, event))
        .buffered(ctx.max_concurrent_events)
        .try_collect()
        .await?;
    Ok(messages.into_iter().filter(|m| filter.matches(m)).collect())
}

/// 补发的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    pub jobs: Vec<DispatchJob>,
    /// 无法生成任务的消息及原因
    pub skipped: Vec<(B256, String)>,
    /// 只有实际发送时才有
    pub report: Option<DispatchReport>,
}

async fn build_job(ctx: &BridgeContext, info: &MessageInfo) -> Result<DispatchJob> {
    let home = ctx.home.at(info.home_bridge);
    let foreign = ctx.foreign.at(info.foreign_bridge);
    let collected = collect(
        &home,
        &ctx.foreign_validators,
        info.message_hash,
        info.number_of_collected_signatures,
        ctx.max_concurrent_events,
    )
    .await?;
    let estimate = estimate_relay(
        &foreign,
        &ctx.foreign_validators,
        &collected,
        ctx.expected_message_length,
        info.number_of_collected_signatures,
    )
    .await?;
    Ok(DispatchJob {
        data: estimate.data,
        gas_estimate: estimate.gas,
        transaction_reference: info.transaction_hash,
        to: foreign.address(),
    })
}

/// 为范围内尚未中继的消息生成中继任务，`dispatcher` 非空时直接发送
///
/// 单条消息估算失败只记入 `skipped`，传输错误终止整个操作。
pub async fn relay_messages(
    ctx: &BridgeContext,
    dispatcher: Option<&Dispatcher>,
    from_block: u64,
    to_block: u64,
    limit: Option<usize>,
) -> Result<RelayOutcome> {
    let filter = MessageFilter {
        relayed: Some(false),
        new_set: None,
    };
    let mut messages = find_messages(ctx, from_block, to_block, filter).await?;
    if let Some(limit) = limit {
        messages.truncate(limit);
    }

    let mut outcome = RelayOutcome::default();
    for info in &messages {
        match build_job(ctx, info).await {
            Ok(job) => {
                info!(
                    message_hash = %info.message_hash,
                    gas_estimate = job.gas_estimate,
                    "Relay job built for CollectedSignatures {}",
                    info.transaction_hash
                );
                outcome.jobs.push(job);
            }
            Err(e @ Error::Rpc(_)) => return Err(e),
            Err(e) => {
                warn!(
                    message_hash = %info.message_hash,
                    error = %e,
                    "Skipping CollectedSignatures {}",
                    info.transaction_hash
                );
                outcome.skipped.push((info.transaction_hash, e.to_string()));
            }
        }
    }

    if let Some(dispatcher) = dispatcher {
        outcome.report = Some(dispatcher.dispatch(outcome.jobs.clone()).await?);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas_price::GasPriceOracle;
    use crate::message::{TransferMessage, ValidatorSetMessage};
    use crate::signer::ValidatorSigner;
    use crate::test_utils::{FakeChain, FOREIGN_BRIDGE, HOME_BRIDGE};
    use crate::types::ChainSide;
    use alloy_primitives::{Bytes, U256};
    use std::sync::Arc;

    struct Setup {
        fake: FakeChain,
        signers: Vec<ValidatorSigner>,
    }

    fn setup() -> Setup {
        let fake = FakeChain::new();
        let signers: Vec<_> = (0..2).map(|_| ValidatorSigner::random()).collect();
        for s in &signers {
            fake.add_home_validator(s.address());
            fake.add_foreign_validator(s.address());
        }
        fake.set_required_signatures(2);
        Setup { fake, signers }
    }

    fn transfer(n: u8) -> Bytes {
        TransferMessage {
            recipient: Address::repeat_byte(0x11),
            value: U256::from(n),
            tx_hash: B256::repeat_byte(n),
            bridge: FOREIGN_BRIDGE,
        }
        .to_bytes()
    }

    impl Setup {
        fn collected(&self, message: &Bytes, block: u64) -> ChainEvent {
            let hash = self.fake.store_collected_message(message, &self.signers);
            self.fake.collected_signatures(self.signers[0].address(), hash, 2, block)
        }
    }

    #[tokio::test]
    async fn test_find_messages_with_filters() {
        let s = setup();
        s.collected(&transfer(1), 10);
        s.collected(&transfer(2), 12);
        let new_set = ValidatorSetMessage {
            tx_hash: B256::repeat_byte(3),
            bridge: FOREIGN_BRIDGE,
            new_set: vec![Address::repeat_byte(0x21)],
        }
        .to_bytes();
        s.collected(&new_set, 14);
        s.fake.mark_relayed(B256::repeat_byte(1));
        let ctx = s.fake.context(ValidatorSigner::random()).await;

        let all = find_messages(&ctx, 0, 100, MessageFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].block_number, 10);
        assert!(all[0].relayed);
        assert_eq!(all[0].home_bridge, HOME_BRIDGE);
        assert_eq!(all[0].foreign_bridge, FOREIGN_BRIDGE);

        let unrelayed = MessageFilter {
            relayed: Some(false),
            new_set: None,
        };
        let found = find_messages(&ctx, 0, 100, unrelayed).await.unwrap();
        assert_eq!(found.len(), 2);

        let only_new_set = MessageFilter {
            relayed: None,
            new_set: Some(true),
        };
        let found = find_messages(&ctx, 0, 100, only_new_set).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message.tx_hash(), B256::repeat_byte(3));

        let found = find_messages(&ctx, 11, 13, MessageFilter::default()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].block_number, 12);
    }

    #[tokio::test]
    async fn test_find_messages_rejects_inverted_range() {
        let s = setup();
        let ctx = s.fake.context(ValidatorSigner::random()).await;
        assert!(matches!(
            find_messages(&ctx, 10, 5, MessageFilter::default()).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_relay_ignores_responsibility() {
        let s = setup();
        s.collected(&transfer(1), 10);
        s.collected(&transfer(2), 11);
        s.fake.mark_relayed(B256::repeat_byte(2));
        // 非验证者也能补发，签名本身来自验证者
        let ctx = s.fake.context(ValidatorSigner::random()).await;

        let outcome = relay_messages(&ctx, None, 0, 100, None).await.unwrap();
        assert_eq!(outcome.jobs.len(), 1);
        assert_eq!(outcome.jobs[0].to, FOREIGN_BRIDGE);
        assert_eq!(outcome.jobs[0].gas_estimate, s.fake.relay_gas());
        assert!(outcome.report.is_none());
        assert!(s.fake.sent(ChainSide::Foreign).is_empty());
    }

    #[tokio::test]
    async fn test_relay_execute_dispatches_with_single_nonce_read() {
        let s = setup();
        for n in 1..=3 {
            s.collected(&transfer(n), 10 + n as u64);
        }
        let ctx = s.fake.context(s.signers[1].clone()).await;
        let dispatcher = Dispatcher::new(
            ChainSide::Foreign,
            s.fake.foreign_chain(),
            s.signers[1].clone(),
            Arc::new(GasPriceOracle::fixed(ChainSide::Foreign, U256::from(2_000_000_000u64))),
            0.0,
        );

        let outcome = relay_messages(&ctx, Some(&dispatcher), 0, 100, Some(2)).await.unwrap();
        assert_eq!(outcome.jobs.len(), 2);
        let report = outcome.report.unwrap();
        assert_eq!(report.sent.len(), 2);
        assert_eq!(s.fake.nonce_queries(ChainSide::Foreign), 1);
    }

    #[tokio::test]
    async fn test_relay_skips_messages_that_cannot_be_relayed() {
        let s = setup();
        s.collected(&transfer(1), 10);
        let hash = s.fake.store_collected_message(&transfer(2), &s.signers[..1]);
        s.fake.collected_signatures(s.signers[0].address(), hash, 1, 11);
        let ctx = s.fake.context(ValidatorSigner::random()).await;

        let outcome = relay_messages(&ctx, None, 0, 100, None).await.unwrap();
        assert_eq!(outcome.jobs.len(), 1);
        assert_eq!(outcome.skipped.len(), 1);
    }

    #[tokio::test]
    async fn test_relay_skips_duplicate_signer_even_if_dry_run_passes() {
        let s = setup();
        let doubled = [s.signers[0].clone(), s.signers[0].clone()];
        let hash = s.fake.store_collected_message(&transfer(1), &doubled);
        s.fake.collected_signatures(s.signers[0].address(), hash, 2, 10);
        s.fake.force_foreign_accept(true);
        let ctx = s.fake.context(ValidatorSigner::random()).await;

        let outcome = relay_messages(&ctx, None, 0, 100, None).await.unwrap();
        assert!(outcome.jobs.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].1.contains("signed twice"));
    }

    #[tokio::test]
    async fn test_relay_fails_when_home_unreachable() {
        let s = setup();
        s.collected(&transfer(1), 10);
        let ctx = s.fake.context(ValidatorSigner::random()).await;
        s.fake.set_home_down(true);

        assert!(matches!(relay_messages(&ctx, None, 0, 100, None).await, Err(Error::Rpc(_))));
    }
}
