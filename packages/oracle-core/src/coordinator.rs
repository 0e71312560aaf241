//! 中继责任分配
//!
//! 合约为每条已收齐签名的消息指定一个负责中继的验证者。其他验证者只记录等待了多少个区块，
//! 超过阈值后按确定性规则算出下一个候选者。这不是选主：重复中继仍可能发生，
//! 由目标链的已中继记录兜底。

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::contracts::ValidatorSet;
use crate::store::{RelayState, RotationHint};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationStrategy {
    /// 从卡住的验证者开始按验证者列表顺序轮换，上一次算出的候选者记录在共享存储里，重启后保持一致
    #[default]
    ValidatorSetWalk,
    /// `(高度 / 阈值) % N`，不需要共享状态
    BlockModulo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Act,
    Wait { responsible: Address },
}

/// 一条等待中继的消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayRequest {
    pub tx_hash: B256,
    pub assigned: Address,
    pub event_block: u64,
    pub current_block: u64,
}

impl RelayRequest {
    pub fn blocks_waiting(&self) -> u64 {
        self.current_block.saturating_sub(self.event_block)
    }
}

#[derive(Debug, Clone)]
pub struct Coordinator {
    me: Address,
    timeout_blocks: u64,
    strategy: RotationStrategy,
}

impl Coordinator {
    /// `timeout_blocks` 为 0 时不轮换
    pub fn new(me: Address, timeout_blocks: u64, strategy: RotationStrategy) -> Self {
        Self {
            me,
            timeout_blocks,
            strategy,
        }
    }

    pub fn me(&self) -> Address {
        self.me
    }

    pub fn rotation_due(&self, request: &RelayRequest) -> bool {
        self.timeout_blocks > 0 && request.blocks_waiting() > self.timeout_blocks
    }

    /// 已经过去的完整超时周期数
    pub fn steps(&self, request: &RelayRequest) -> u64 {
        if self.timeout_blocks == 0 {
            return 0;
        }
        request.blocks_waiting() / self.timeout_blocks
    }

    /// 超时后的候选者；验证者列表为空时退回合约指定的验证者
    ///
    /// 按列表轮换时，上一次的候选者仍在列表中就从它继续往后走；
    /// 否则从合约指定的验证者开始，它也已离开时从列表第一个开始。
    pub fn rotated_candidate(
        &self,
        request: &RelayRequest,
        validators: &[Address],
        hint: Option<RotationHint>,
    ) -> Address {
        if validators.is_empty() || self.timeout_blocks == 0 {
            return request.assigned;
        }
        let n = validators.len() as u64;
        let steps = self.steps(request);
        let position = |address: Address| validators.iter().position(|v| *v == address).map(|i| i as u64);
        let index = match self.strategy {
            RotationStrategy::ValidatorSetWalk => {
                let from_hint = hint.and_then(|h| position(h.authority).map(|i| i + steps.saturating_sub(h.step)));
                match (from_hint, position(request.assigned)) {
                    (Some(index), _) => index % n,
                    (None, Some(start)) => (start + steps % n) % n,
                    (None, None) => steps.saturating_sub(1) % n,
                }
            }
            RotationStrategy::BlockModulo => (request.current_block / self.timeout_blocks) % n,
        };
        validators[index as usize]
    }

    /// 合约指定的验证者始终可以中继；超时后轮换到的候选者也可以
    pub async fn decide(
        &self,
        request: &RelayRequest,
        validators: &ValidatorSet,
        state: &RelayState,
    ) -> Result<Decision> {
        if request.assigned == self.me {
            return Ok(Decision::Act);
        }
        if !self.rotation_due(request) {
            return Ok(Decision::Wait {
                responsible: request.assigned,
            });
        }

        let set = validators.validators().await?;
        let hint = match self.strategy {
            RotationStrategy::ValidatorSetWalk => match state.rotation_hint(request.tx_hash).await {
                Ok(hint) => hint,
                Err(e) => {
                    warn!(tx_hash = %request.tx_hash, error = %e, "Ignoring unreadable rotation hint");
                    None
                }
            },
            RotationStrategy::BlockModulo => None,
        };
        let candidate = self.rotated_candidate(request, &set, hint);
        debug!(
            tx_hash = %request.tx_hash,
            assigned = %request.assigned,
            %candidate,
            blocks_waiting = request.blocks_waiting(),
            "Relay responsibility rotated"
        );

        if self.strategy == RotationStrategy::ValidatorSetWalk {
            let tried = RotationHint {
                authority: candidate,
                step: self.steps(request),
            };
            if hint != Some(tried) {
                if let Err(e) = state.set_rotation_hint(request.tx_hash, &tried).await {
                    warn!(tx_hash = %request.tx_hash, error = %e, "Failed to record rotation hint");
                }
            }
        }

        if candidate == self.me {
            Ok(Decision::Act)
        } else {
            Ok(Decision::Wait {
                responsible: candidate,
            })
        }
    }
}
