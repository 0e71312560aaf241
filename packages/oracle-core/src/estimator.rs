//! gas 估算与失败分类
//!
//! dry run 回滚只说明"不能执行"，要区分已中继、签名不足、签名者无效，
//! 只能在回滚后按固定顺序查询链上状态。

use alloy_primitives::{keccak256, Address, Bytes, B256};
use alloy_sol_types::SolCall;
use tracing::{debug, error};

use crate::aggregator::{verify_signers, CollectedMessage};
use crate::contracts::{sender_hash, ForeignBridge, HomeBridge, IForeignBridge, ValidatorSet};
use crate::message::classify_then_decode;
use crate::{Error, Result};

/// `round(gas * (1 + extra_percentage))`
pub fn add_extra_gas(gas: u64, extra_percentage: f64) -> u64 {
    (gas as f64 * (1.0 + extra_percentage)).round() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMethod {
    ExecuteSignatures,
    ExecuteNewSetSignatures,
}

impl RelayMethod {
    /// 长度等于期望长度的是转账消息，其他都按验证者集合消息执行
    pub fn for_message(message: &[u8], expected_message_length: usize) -> Self {
        if message.len() == expected_message_length {
            RelayMethod::ExecuteSignatures
        } else {
            RelayMethod::ExecuteNewSetSignatures
        }
    }

    pub fn encode(&self, collected: &CollectedMessage) -> Bytes {
        let bundle = collected.bundle();
        let data = match self {
            RelayMethod::ExecuteSignatures => IForeignBridge::executeSignaturesCall {
                vs: bundle.vs,
                rs: bundle.rs,
                ss: bundle.ss,
                message: collected.message.clone(),
            }
            .abi_encode(),
            RelayMethod::ExecuteNewSetSignatures => IForeignBridge::executeNewSetSignaturesCall {
                vs: bundle.vs,
                rs: bundle.rs,
                ss: bundle.ss,
                message: collected.message.clone(),
            }
            .abi_encode(),
        };
        Bytes::from(data)
    }
}

impl std::fmt::Display for RelayMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayMethod::ExecuteSignatures => f.write_str("executeSignatures"),
            RelayMethod::ExecuteNewSetSignatures => f.write_str("executeNewSetSignatures"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEstimate {
    pub gas: u64,
    pub method: RelayMethod,
    pub data: Bytes,
}

/// dry run 目标链上的中继调用，失败时按顺序分类：
/// 传输错误、已中继、签名数不足、签名者无效、未知
pub async fn estimate_relay(
    foreign: &ForeignBridge,
    validators: &ValidatorSet,
    collected: &CollectedMessage,
    expected_message_length: usize,
    number_of_collected_signatures: u64,
) -> Result<RelayEstimate> {
    let method = RelayMethod::for_message(&collected.message, expected_message_length);
    let data = method.encode(collected);
    debug!(%method, "Estimate gas");

    let cause = match foreign.estimate(None, data.clone()).await {
        Ok(gas) => return Ok(RelayEstimate { gas, method, data }),
        Err(e @ Error::Rpc(_)) => return Err(e),
        Err(e) => e,
    };

    debug!("Check if the message was already processed");
    let parsed = classify_then_decode(&collected.message, expected_message_length)?;
    if foreign.relayed_messages(parsed.tx_hash()).await? {
        return Err(Error::AlreadyProcessed);
    }

    debug!("Check if number of signatures is enough");
    let required = validators.required_signatures().await?;
    if required > number_of_collected_signatures {
        return Err(Error::IncompatibleContract(
            "The number of collected signatures does not match".to_string(),
        ));
    }

    verify_signers(&collected.message, &collected.signatures, validators).await?;

    error!(error = %cause, "Unknown error while estimating relay");
    Err(Error::UnknownEstimateFailure(cause.to_string()))
}

/// 源链上签名类调用用来判断"已完成"的合约记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionRecord {
    /// `numMessagesSigned` / `messagesSigned`
    Message(B256),
    /// `numAffirmationsSigned` / `affirmationsSigned`
    Affirmation(B256),
}

impl SubmissionRecord {
    pub fn for_message(message: &[u8]) -> Self {
        SubmissionRecord::Message(keccak256(message))
    }
}

/// 以本验证者身份 dry run 一次 home 链上的签名提交
///
/// 回滚后依次检查：已被足够多验证者处理、本验证者已签过、本验证者不在验证者集合中。
pub async fn estimate_home_submission(
    home: &HomeBridge,
    validators: &ValidatorSet,
    validator: Address,
    data: Bytes,
    record: SubmissionRecord,
) -> Result<u64> {
    let cause = match home.estimate(validator, data).await {
        Ok(gas) => return Ok(gas),
        Err(e @ Error::Rpc(_)) => return Err(e),
        Err(e) => e,
    };

    let (signed, already_signed) = match record {
        SubmissionRecord::Message(hash) => (
            home.num_messages_signed(hash).await?,
            home.messages_signed(sender_hash(validator, hash)).await?,
        ),
        SubmissionRecord::Affirmation(hash) => (
            home.num_affirmations_signed(hash).await?,
            home.affirmations_signed(sender_hash(validator, hash)).await?,
        ),
    };
    if home.is_already_processed(signed).await? {
        return Err(Error::AlreadyProcessed);
    }
    if already_signed {
        return Err(Error::AlreadySigned);
    }
    if !validators.is_validator(validator).await? {
        return Err(Error::InvalidValidator(validator));
    }

    error!(error = %cause, "Unknown error while estimating submission");
    Err(Error::UnknownEstimateFailure(cause.to_string()))
}
