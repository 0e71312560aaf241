use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{run_batch, EventProcessor};
use crate::context::BridgeContext;
use crate::contracts::EventKind;
use crate::types::{BridgeMapping, ChainEvent, DispatchJob};
use crate::Result;

/// 映射合约 `BridgeMappingUpdated`：把新部署的桥对写入注册表，不产生交易
pub struct BridgeMappings {
    ctx: Arc<BridgeContext>,
}

impl BridgeMappings {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    async fn handle(&self, event: ChainEvent) -> Result<Option<DispatchJob>> {
        let mapping = BridgeMapping::from_log(&event)?;
        info!(
            key = %mapping.key,
            home_bridge = %mapping.home_bridge,
            foreign_bridge = %mapping.foreign_bridge,
            "Bridge mapping updated"
        );
        self.ctx.registry.upsert(&mapping).await?;
        Ok(None)
    }
}

#[async_trait]
impl EventProcessor for BridgeMappings {
    fn kind(&self) -> EventKind {
        EventKind::BridgeMapping
    }

    /// 同一个 key 的多次更新按区块顺序依次写入，最后一次生效
    async fn process(&self, events: Vec<ChainEvent>, _current_block: u64) -> Result<Vec<DispatchJob>> {
        run_batch(self.kind(), events, 1, |e| self.handle(e)).await
    }
}
