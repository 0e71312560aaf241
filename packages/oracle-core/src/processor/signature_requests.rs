use std::sync::Arc;

use alloy_primitives::Bytes;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{escalate_own_invalid, run_batch, EventProcessor};
use crate::context::BridgeContext;
use crate::contracts::{EventKind, HomeBridge, IHomeBridge, SignatureRequest};
use crate::estimator::{estimate_home_submission, SubmissionRecord};
use crate::message::{encode_hex, TransferMessage};
use crate::types::{ChainEvent, DispatchJob};
use crate::Result;

/// home 链 `UserRequestForSignature`：签名转账消息并提交到 home bridge
pub struct SignatureRequests {
    ctx: Arc<BridgeContext>,
}

impl SignatureRequests {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    async fn handle(&self, event: ChainEvent) -> Result<Option<DispatchJob>> {
        let ctx = &self.ctx;
        let request = SignatureRequest::from_log(&event)?;
        let recipient = request.effective_recipient();
        info!(%recipient, value = %request.value, "Processing signatureRequest {}", event.transaction_hash);

        let home = ctx.home.at(event.address);
        let foreign = ctx.foreign_bridge_for(event.address).await?;
        let message = TransferMessage {
            recipient,
            value: request.value,
            tx_hash: event.transaction_hash,
            bridge: foreign.address(),
        };
        signed_transfer_job(ctx, &home, &message).await.map(Some)
    }
}

/// 签名转账消息，dry run `submitSignature` 并生成发往 `home` 的任务
pub(super) async fn signed_transfer_job(
    ctx: &BridgeContext,
    home: &HomeBridge,
    message: &TransferMessage,
) -> Result<DispatchJob> {
    let message_bytes = message.encode(ctx.expected_message_length)?;
    let signature = ctx.signer.sign_message(&message_bytes)?;
    debug!(message = %encode_hex(&message_bytes), "Message signed");

    let me = ctx.validator_address();
    let data = Bytes::from(
        IHomeBridge::submitSignatureCall {
            signature,
            message: message_bytes.clone(),
        }
        .abi_encode(),
    );
    let gas_estimate = estimate_home_submission(
        home,
        &ctx.home_validators,
        me,
        data.clone(),
        SubmissionRecord::for_message(&message_bytes),
    )
    .await
    .map_err(escalate_own_invalid(me))?;
    debug!(gas_estimate, "Gas estimated");

    Ok(DispatchJob {
        data,
        gas_estimate,
        transaction_reference: message.tx_hash,
        to: home.address(),
    })
}

#[async_trait]
impl EventProcessor for SignatureRequests {
    fn kind(&self) -> EventKind {
        EventKind::SignatureRequest
    }

    async fn process(&self, events: Vec<ChainEvent>, _current_block: u64) -> Result<Vec<DispatchJob>> {
        run_batch(self.kind(), events, self.ctx.max_concurrent_events, |e| self.handle(e)).await
    }
}
