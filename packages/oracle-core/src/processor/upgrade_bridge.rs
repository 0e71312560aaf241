use std::sync::Arc;

use alloy_primitives::Bytes;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{escalate_own_invalid, run_batch, EventProcessor};
use crate::context::BridgeContext;
use crate::contracts::{EventKind, IHomeBridge, UpgradeBridge};
use crate::estimator::{estimate_home_submission, SubmissionRecord};
use crate::message::{encode_hex, UpgradeMessage};
use crate::types::{ChainEvent, DispatchJob};
use crate::Result;

/// 代理存储合约中 home bridge 的合约类型编号，其余类型都属于 foreign 链
pub const HOME_BRIDGE_CONTRACT_TYPE: u8 = 5;

/// 代理存储合约 `UpgradeBridge`：签名桥合约升级消息，只由 foreign 验证者处理
pub struct UpgradeBridgeProcessor {
    ctx: Arc<BridgeContext>,
}

impl UpgradeBridgeProcessor {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    async fn handle(&self, event: ChainEvent) -> Result<Option<DispatchJob>> {
        let ctx = &self.ctx;
        let upgrade = UpgradeBridge::from_log(&event)?;
        let me = ctx.validator_address();

        if !ctx.foreign_validators.is_validator(me).await? {
            info!(
                "Validator is not part of foreign validators, so not responsible for handling UpgradeBridge {}",
                event.transaction_hash
            );
            return Ok(None);
        }
        info!(
            contract_type = upgrade.contract_type,
            contract_address = %upgrade.contract_address,
            "Processing upgradeBridge {}",
            event.transaction_hash
        );

        let bridge = if upgrade.contract_type == HOME_BRIDGE_CONTRACT_TYPE {
            ctx.home.address()
        } else {
            ctx.foreign.address()
        };
        let message = UpgradeMessage {
            tx_hash: event.transaction_hash,
            bridge,
            contract_type: upgrade.contract_type,
            contract_address: upgrade.contract_address,
        }
        .to_bytes();
        let signature = ctx.signer.sign_message(&message)?;
        debug!(message = %encode_hex(&message), "Message signed");

        let data = Bytes::from(
            IHomeBridge::submitSignatureOfBridgeUpgradeCall {
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
impl EventProcessor for UpgradeBridgeProcessor {
    fn kind(&self) -> EventKind {
        EventKind::UpgradeBridge
    }

    async fn process(&self, events: Vec<ChainEvent>, _current_block: u64) -> Result<Vec<DispatchJob>> {
        run_batch(self.kind(), events, self.ctx.max_concurrent_events, |e| self.handle(e)).await
    }
}
