pub mod config;
pub mod types;
pub mod message;
pub mod contracts;
pub mod chain_adapter;
pub mod store;
pub mod queue;
pub mod signer;
pub mod gas_price;
pub mod coordinator;
pub mod aggregator;
pub mod estimator;
pub mod processor;
pub mod watcher;
pub mod dispatcher;
pub mod recovery;
pub mod context;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::Config;
pub use context::BridgeContext;
pub use types::{BridgeMapping, ChainEvent, DispatchJob, WatcherCursor};
pub use message::CrossChainMessage;

use alloy_primitives::Address;

pub type Result<T> = std::result::Result<T, Error>;

/// 需要由外部监管进程处理的致命错误，核心逻辑只负责上抛
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FatalError {
    #[error("startup failure")]
    General,

    #[error("max processing time reached")]
    MaxProcessingTime,

    #[error("validator is not compatible with the bridge contracts")]
    Incompatibility,
}

impl FatalError {
    /// 进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            FatalError::General => 1,
            FatalError::MaxProcessingTime => 3,
            FatalError::Incompatibility => 4,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("RPC connection error: {0}")]
    Rpc(String),

    #[error("Execution reverted: {0}")]
    Reverted(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Message already processed")]
    AlreadyProcessed,

    #[error("Message already signed by this validator")]
    AlreadySigned,

    #[error("Incompatible contract: {0}")]
    IncompatibleContract(String),

    #[error("Message length {actual} does not match required message length {required}")]
    MessageLengthMismatch { actual: usize, required: usize },

    #[error("Message signed by {0} that is not a validator")]
    InvalidValidator(Address),

    #[error("Validator {0} signed twice")]
    DuplicateSigner(Address),

    #[error("Unknown error while processing message: {0}")]
    UnknownEstimateFailure(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Fatal: {0}")]
    Fatal(FatalError),
}

/// 处理单个事件失败后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 传输层故障，放弃本轮，下一轮重试
    Retry,
    /// 已完成或尚未就绪，静默跳过
    Skip,
    /// 协议违规，跳过并以 error 级别记录
    Reject,
    /// 未知错误，只终止当前事件
    Propagate,
    /// 终止进程
    Fatal,
}

impl Error {
    pub fn disposition(&self) -> Disposition {
        match self {
            Error::Rpc(_) => Disposition::Retry,
            Error::AlreadyProcessed | Error::AlreadySigned | Error::IncompatibleContract(_) => {
                Disposition::Skip
            }
            Error::InvalidValidator(_) | Error::DuplicateSigner(_) | Error::MessageLengthMismatch { .. } => {
                Disposition::Reject
            }
            Error::Fatal(_) => Disposition::Fatal,
            _ => Disposition::Propagate,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(FatalError::General.exit_code(), 1);
        assert_eq!(FatalError::MaxProcessingTime.exit_code(), 3);
        assert_eq!(FatalError::Incompatibility.exit_code(), 4);
    }

    #[test]
    fn test_dispositions() {
        assert_eq!(Error::Rpc("timeout".into()).disposition(), Disposition::Retry);
        assert_eq!(Error::AlreadyProcessed.disposition(), Disposition::Skip);
        assert_eq!(Error::AlreadySigned.disposition(), Disposition::Skip);
        assert_eq!(
            Error::IncompatibleContract("not enough signatures".into()).disposition(),
            Disposition::Skip
        );
        assert_eq!(Error::InvalidValidator(Address::ZERO).disposition(), Disposition::Reject);
        assert_eq!(Error::DuplicateSigner(Address::ZERO).disposition(), Disposition::Reject);
        assert_eq!(
            Error::MessageLengthMismatch { actual: 104, required: 136 }.disposition(),
            Disposition::Reject
        );
        assert_eq!(Error::UnknownEstimateFailure("?".into()).disposition(), Disposition::Propagate);
        assert_eq!(Error::Reverted("?".into()).disposition(), Disposition::Propagate);
        assert_eq!(
            Error::Fatal(FatalError::MaxProcessingTime).disposition(),
            Disposition::Fatal
        );
    }
}
