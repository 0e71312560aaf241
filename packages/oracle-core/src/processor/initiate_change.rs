use std::sync::Arc;

use alloy_primitives::Bytes;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{escalate_own_invalid, run_batch, EventProcessor};
use crate::context::BridgeContext;
use crate::contracts::{EventKind, IHomeBridge, InitiateChange};
use crate::estimator::{estimate_home_submission, SubmissionRecord};
use crate::message::{encode_hex, ValidatorSetMessage};
use crate::types::{ChainEvent, DispatchJob};
use crate::Result;

/// home 验证者合约 `InitiateChange`：签名新的验证者集合，随后中继到 foreign 链
pub struct InitiateChangeProcessor {
    ctx: Arc<BridgeContext>,
}

impl InitiateChangeProcessor {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    async fn handle(&self, event: ChainEvent) -> Result<Option<DispatchJob>> {
        let ctx = &self.ctx;
        let change = InitiateChange::from_log(&event)?;
        info!(validators = change.new_set.len(), "Processing initiateChange {}", event.transaction_hash);

        let message = ValidatorSetMessage {
            tx_hash: event.transaction_hash,
            bridge: ctx.foreign.address(),
            new_set: change.new_set,
        }
        .to_bytes();
        let signature = ctx.signer.sign_message(&message)?;
        debug!(message = %encode_hex(&message), "Message signed");

        let me = ctx.validator_address();
        let data = Bytes::from(
            IHomeBridge::submitSignatureOfMessageWithUnknownLengthCall {
                signature,
                message: message.clone(),
            }
            .abi_encode(),
        );
        let gas_estimate = estimate_home_submission(
            &ctx.home,
            &ctx.home_validators,
            me,
            data.clone(),
            SubmissionRecord::for_message(&message),
        )
        .await
        .map_err(escalate_own_invalid(me))?;

        Ok(Some(DispatchJob {
            data,
            gas_estimate,
            transaction_reference: event.transaction_hash,
            to: ctx.home.address(),
        }))
    }
}

#[async_trait]
impl EventProcessor for InitiateChangeProcessor {
    fn kind(&self) -> EventKind {
        EventKind::InitiateChange
    }

    async fn process(&self, events: Vec<ChainEvent>, _current_block: u64) -> Result<Vec<DispatchJob>> {
        run_batch(self.kind(), events, self.ctx.max_concurrent_events, |e| self.handle(e)).await
    }
}
