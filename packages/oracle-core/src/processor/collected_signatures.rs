use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use alloy_primitives::B256;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::{run_batch, EventProcessor};
use crate::aggregator::collect;
use crate::context::BridgeContext;
use crate::contracts::{CollectedSignatures, EventKind};
use crate::coordinator::{Coordinator, Decision, RelayRequest};
use crate::estimator::estimate_relay;
use crate::message::classify_then_decode;
use crate::store::{PendingRelay, RelayState};
use crate::types::{ChainEvent, DispatchJob};
use crate::{Disposition, Error, Result};

/// 一个事件本轮评估后对等待集合的改动
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingUpdate {
    /// 已完成或永远无法完成
    Settle,
    /// 等待其他验证者
    Wait,
    /// 原因不明的失败或签名数不足，计入失败次数
    Fail,
}

impl PendingUpdate {
    /// 传输错误和致命错误会让整批失败，不产生改动
    fn for_outcome(outcome: &Result<Option<DispatchJob>>) -> Option<Self> {
        match outcome {
            Ok(Some(_)) | Err(Error::AlreadyProcessed) | Err(Error::Codec(_)) => Some(Self::Settle),
            Ok(None) => Some(Self::Wait),
            Err(e) => match e.disposition() {
                Disposition::Reject => Some(Self::Settle),
                Disposition::Skip | Disposition::Propagate => Some(Self::Fail),
                Disposition::Retry | Disposition::Fatal => None,
            },
        }
    }
}

type Updates = Mutex<Vec<(ChainEvent, PendingUpdate)>>;

/// home 链 `CollectedSignatures`：由负责的验证者把消息和签名中继到 foreign bridge
///
/// 不负责中继的事件记入等待集合，之后每一轮都会和新事件一起重新评估，
/// 直到目标链上已中继或轮换到本验证者。等待集合的改动只在整批成功后写入。
pub struct CollectedSignaturesProcessor {
    ctx: Arc<BridgeContext>,
    coordinator: Coordinator,
    state: RelayState,
}

impl CollectedSignaturesProcessor {
    pub fn new(ctx: Arc<BridgeContext>, watcher_id: &str) -> Self {
        let coordinator = Coordinator::new(ctx.validator_address(), ctx.relay_timeout_blocks, ctx.rotation_strategy);
        let state = RelayState::new(ctx.store.clone(), watcher_id);
        Self {
            ctx,
            coordinator,
            state,
        }
    }

    async fn load_pending(&self) -> Vec<PendingRelay> {
        match self.state.pending_relays().await {
            Ok(pending) => {
                if !pending.is_empty() {
                    debug!(pending = pending.len(), "Re-evaluating pending relays");
                }
                pending
            }
            Err(e) => {
                warn!(error = %e, "Failed to load pending relays");
                Vec::new()
            }
        }
    }

    /// 等待集合在前，新事件在后，按交易哈希去重
    fn merge(pending: &[PendingRelay], events: Vec<ChainEvent>) -> Vec<ChainEvent> {
        let mut seen = HashSet::new();
        pending
            .iter()
            .map(|p| p.event.clone())
            .chain(events)
            .filter(|e| seen.insert(e.transaction_hash))
            .collect()
    }

    async fn handle(&self, event: ChainEvent, current_block: u64, updates: &Updates) -> Result<Option<DispatchJob>> {
        let outcome = self.relay(&event, current_block).await;
        if let Some(update) = PendingUpdate::for_outcome(&outcome) {
            updates
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((event, update));
        }
        outcome
    }

    async fn relay(&self, event: &ChainEvent, current_block: u64) -> Result<Option<DispatchJob>> {
        let ctx = &self.ctx;
        let collected = CollectedSignatures::from_log(event)?;
        let home = ctx.home.at(event.address);
        let foreign = ctx.foreign_bridge_for(event.address).await?;
        let request = RelayRequest {
            tx_hash: event.transaction_hash,
            assigned: collected.authority_responsible_for_relay,
            event_block: event.block_number,
            current_block,
        };

        if let Decision::Wait { responsible } = self.coordinator.decide(&request, &ctx.home_validators, &self.state).await? {
            info!(%responsible, "Validator not responsible for relaying CollectedSignatures {}", event.transaction_hash);
            let message = home.message(collected.message_hash).await?;
            let parsed = classify_then_decode(&message, ctx.expected_message_length)?;
            if foreign.relayed_messages(parsed.tx_hash()).await? {
                return Err(Error::AlreadyProcessed);
            }
            return Ok(None);
        }

        info!(
            message_hash = %collected.message_hash,
            signatures = collected.number_of_collected_signatures,
            "Processing CollectedSignatures {}",
            event.transaction_hash
        );
        debug!("Getting message and signatures");
        let collected_message = collect(
            &home,
            &ctx.foreign_validators,
            collected.message_hash,
            collected.number_of_collected_signatures,
            ctx.max_concurrent_events,
        )
        .await?;

        let estimate = estimate_relay(
            &foreign,
            &ctx.foreign_validators,
            &collected_message,
            ctx.expected_message_length,
            collected.number_of_collected_signatures,
        )
        .await?;
        debug!(gas_estimate = estimate.gas, method = %estimate.method, "Gas estimated");

        Ok(Some(DispatchJob {
            data: estimate.data,
            gas_estimate: estimate.gas,
            transaction_reference: event.transaction_hash,
            to: foreign.address(),
        }))
    }

    /// `failures` 是本轮开始时等待集合里记录的失败次数
    async fn apply(&self, updates: Vec<(ChainEvent, PendingUpdate)>, failures: &HashMap<B256, u32>) {
        for (event, update) in updates {
            let tx_hash = event.transaction_hash;
            let failed = failures.get(&tx_hash).copied().unwrap_or(0).saturating_add(1);
            match update {
                PendingUpdate::Settle => self.settle(tx_hash).await,
                PendingUpdate::Wait => self.keep(PendingRelay::new(event)).await,
                PendingUpdate::Fail if failed > self.ctx.max_pending_failures => {
                    error!(%tx_hash, failures = failed, "Dropping pending relay after repeated failures");
                    self.settle(tx_hash).await
                }
                PendingUpdate::Fail => self.keep(PendingRelay { event, failures: failed }).await,
            }
        }
    }

    async fn settle(&self, tx_hash: B256) {
        if let Err(e) = self.state.remove_pending(tx_hash).await {
            warn!(%tx_hash, error = %e, "Failed to remove pending relay");
        }
        if let Err(e) = self.state.clear_rotation_hint(tx_hash).await {
            warn!(%tx_hash, error = %e, "Failed to clear rotation hint");
        }
    }

    async fn keep(&self, relay: PendingRelay) {
        if let Err(e) = self.state.put_pending(&relay).await {
            warn!(tx_hash = %relay.event.transaction_hash, error = %e, "Failed to record pending relay");
        }
    }
}

#[async_trait]
impl EventProcessor for CollectedSignaturesProcessor {
    fn kind(&self) -> EventKind {
        EventKind::CollectedSignatures
    }

    async fn process(&self, events: Vec<ChainEvent>, current_block: u64) -> Result<Vec<DispatchJob>> {
        let pending = self.load_pending().await;
        let events = Self::merge(&pending, events);
        let failures: HashMap<B256, u32> = pending
            .into_iter()
            .map(|p| (p.event.transaction_hash, p.failures))
            .collect();

        let updates = Updates::default();
        let jobs = run_batch(self.kind(), events, self.ctx.max_concurrent_events, |e| {
            self.handle(e, current_block, &updates)
        })
        .await?;

        let updates = updates.into_inner().unwrap_or_else(PoisonError::into_inner);
        self.apply(updates, &failures).await;
        Ok(jobs)
    }
}
