use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::signature_requests::signed_transfer_job;
use super::{run_batch, EventProcessor};
use crate::context::BridgeContext;
use crate::contracts::{EventKind, RewardedOnCycle};
use crate::message::TransferMessage;
use crate::types::{ChainEvent, DispatchJob};
use crate::Result;

/// home 链区块奖励合约 `RewardedOnCycle`：为铸造的奖励签名，奖励锁在 foreign bridge 上
pub struct RewardedOnCycleProcessor {
    ctx: Arc<BridgeContext>,
}

impl RewardedOnCycleProcessor {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    async fn handle(&self, event: ChainEvent) -> Result<Option<DispatchJob>> {
        let ctx = &self.ctx;
        let reward = RewardedOnCycle::from_log(&event)?;
        info!(value = %reward.amount, "Processing rewardedOnCycle {}", event.transaction_hash);

        let foreign_bridge = ctx.foreign.address();
        let message = TransferMessage {
            recipient: foreign_bridge,
            value: reward.amount,
            tx_hash: event.transaction_hash,
            bridge: foreign_bridge,
        };
        signed_transfer_job(ctx, &ctx.home, &message).await.map(Some)
    }
}

#[async_trait]
impl EventProcessor for RewardedOnCycleProcessor {
    fn kind(&self) -> EventKind {
        EventKind::RewardedOnCycle
    }

    async fn process(&self, events: Vec<ChainEvent>, _current_block: u64) -> Result<Vec<DispatchJob>> {
        run_batch(self.kind(), events, self.ctx.max_concurrent_events, |e| self.handle(e)).await
    }
}
