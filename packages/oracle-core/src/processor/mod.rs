//! 事件处理器：把一批链上事件变成待发送的交易
//!
//! 每个事件在独立的 future 中处理，并发数受 `max_concurrent_events` 限制，
//! 批内完成顺序不保证。单个事件失败按 [`Disposition`] 处理，不影响同批其他事件；
//! 传输层错误使整批失败，由 watcher 在下一轮重试。

use std::future::Future;
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{error, info, warn, Instrument};

use crate::context::BridgeContext;
use crate::contracts::EventKind;
use crate::types::{ChainEvent, DispatchJob};
use crate::{Disposition, Error, FatalError, Result};

pub mod affirmation_requests;
pub mod bridge_mappings;
pub mod collected_signatures;
pub mod initiate_change;
pub mod rewarded_on_cycle;
pub mod signature_requests;
pub mod transfers;
pub mod upgrade_bridge;

pub use affirmation_requests::AffirmationRequests;
pub use bridge_mappings::BridgeMappings;
pub use collected_signatures::CollectedSignaturesProcessor;
pub use initiate_change::InitiateChangeProcessor;
pub use rewarded_on_cycle::RewardedOnCycleProcessor;
pub use signature_requests::SignatureRequests;
pub use transfers::Transfers;
pub use upgrade_bridge::UpgradeBridgeProcessor;

#[async_trait]
pub trait EventProcessor: Send + Sync {
    fn kind(&self) -> EventKind;

    /// `current_block` 是本轮读取到的链头高度
    async fn process(&self, events: Vec<ChainEvent>, current_block: u64) -> Result<Vec<DispatchJob>>;
}

/// 按事件种类创建处理器
pub fn build(kind: EventKind, ctx: Arc<BridgeContext>, watcher_id: &str) -> Box<dyn EventProcessor> {
    match kind {
        EventKind::SignatureRequest => Box::new(SignatureRequests::new(ctx)),
        EventKind::CollectedSignatures => Box::new(CollectedSignaturesProcessor::new(ctx, watcher_id)),
        EventKind::AffirmationRequest => Box::new(AffirmationRequests::new(ctx)),
        EventKind::InitiateChange => Box::new(InitiateChangeProcessor::new(ctx)),
        EventKind::UpgradeBridge => Box::new(UpgradeBridgeProcessor::new(ctx)),
        EventKind::BridgeMapping => Box::new(BridgeMappings::new(ctx)),
        EventKind::Transfer => Box::new(Transfers::new(ctx)),
        EventKind::RewardedOnCycle => Box::new(RewardedOnCycleProcessor::new(ctx)),
    }
}

/// 本验证者自己不在验证者集合中时无法继续工作，升级为致命错误
pub(crate) fn escalate_own_invalid(me: Address) -> impl Fn(Error) -> Error {
    move |e| match e {
        Error::InvalidValidator(address) if address == me => {
            error!(%address, "Invalid validator");
            Error::Fatal(FatalError::Incompatibility)
        }
        other => other,
    }
}

/// 以有限并发处理一批事件，并按错误去向汇总结果
pub(crate) async fn run_batch<F, Fut>(
    kind: EventKind,
    events: Vec<ChainEvent>,
    concurrency: usize,
    handle: F,
) -> Result<Vec<DispatchJob>>
where
    F: Fn(ChainEvent) -> Fut,
    Fut: Future<Output = Result<Option<DispatchJob>>>,
{
    if events.is_empty() {
        return Ok(Vec::new());
    }

    let outcomes: Vec<(B256, Result<Option<DispatchJob>>)> = futures::stream::iter(events)
        .map(|event| {
            let tx_hash = event.transaction_hash;
            let span = tracing::info_span!("event", %tx_hash, kind = %kind);
            let fut = handle(event);
            async move { (tx_hash, fut.await) }.instrument(span)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut jobs = Vec::new();
    let mut retry = None;
    let mut fatal = None;
    for (tx_hash, outcome) in outcomes {
        let err = match outcome {
            Ok(Some(job)) => {
                jobs.push(job);
                continue;
            }
            Ok(None) => continue,
            Err(e) => e,
        };
        match err.disposition() {
            Disposition::Skip => info!(%tx_hash, "{kind} skipped: {err}"),
            Disposition::Reject => {
                error!(%tx_hash, "The message couldn't be processed; skipping: {err}")
            }
            Disposition::Propagate => {
                error!(%tx_hash, error = %err, "Unknown error while processing {kind}")
            }
            Disposition::Retry => {
                warn!(%tx_hash, error = %err, "Rpc failure while processing {kind}");
                retry.get_or_insert(err);
            }
            Disposition::Fatal => {
                fatal.get_or_insert(err);
            }
        }
    }

    if let Some(e) = fatal.or(retry) {
        return Err(e);
    }
    info!(kind = %kind, jobs = jobs.len(), "Transactions to send");
    Ok(jobs)
}
