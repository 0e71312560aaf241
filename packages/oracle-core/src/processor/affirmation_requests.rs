use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{escalate_own_invalid, run_batch, EventProcessor};
use crate::context::BridgeContext;
use crate::contracts::{affirmation_hash, AffirmationRequest, EventKind, HomeBridge, IHomeBridge};
use crate::estimator::{estimate_home_submission, SubmissionRecord};
use crate::types::{ChainEvent, DispatchJob};
use crate::Result;

/// foreign 链 `UserRequestForAffirmation`：在 home bridge 上确认这笔转账
pub struct AffirmationRequests {
    ctx: Arc<BridgeContext>,
}

impl AffirmationRequests {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    async fn handle(&self, event: ChainEvent) -> Result<Option<DispatchJob>> {
        let ctx = &self.ctx;
        let request = AffirmationRequest::from_log(&event)?;
        info!(
            recipient = %request.recipient,
            value = %request.value,
            "Processing affirmationRequest {}",
            event.transaction_hash
        );

        affirmation_job(ctx, &ctx.home, request.recipient, request.value, event.transaction_hash)
            .await
            .map(Some)
    }
}

/// dry run `executeAffirmation` 并生成发往 `home` 的任务
pub(super) async fn affirmation_job(
    ctx: &BridgeContext,
    home: &HomeBridge,
    recipient: Address,
    value: U256,
    tx_hash: B256,
) -> Result<DispatchJob> {
    let me = ctx.validator_address();
    let data = Bytes::from(
        IHomeBridge::executeAffirmationCall {
            recipient,
            value,
            transactionHash: tx_hash,
        }
        .abi_encode(),
    );
    let record = SubmissionRecord::Affirmation(affirmation_hash(recipient, value, tx_hash));
    let gas_estimate = estimate_home_submission(home, &ctx.home_validators, me, data.clone(), record)
        .await
        .map_err(escalate_own_invalid(me))?;
    debug!(gas_estimate, "Gas estimated");

    Ok(DispatchJob {
        data,
        gas_estimate,
        transaction_reference: tx_hash,
        to: home.address(),
    })
}

#[async_trait]
impl EventProcessor for AffirmationRequests {
    fn kind(&self) -> EventKind {
        EventKind::AffirmationRequest
    }

    async fn process(&self, events: Vec<ChainEvent>, _current_block: u64) -> Result<Vec<DispatchJob>> {
        run_batch(self.kind(), events, self.ctx.max_concurrent_events, |e| self.handle(e)).await
    }
}
