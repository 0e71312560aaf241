use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 桥的两端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainSide {
    Home,
    Foreign,
}

impl fmt::Display for ChainSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainSide::Home => write!(f, "home"),
            ChainSide::Foreign => write!(f, "foreign"),
        }
    }
}

/// 链上事件日志，字段与 eth_getLogs 的返回一致
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEvent {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub transaction_hash: B256,
    #[serde(default)]
    pub log_index: u64,
}

/// 事件查询条件，区块范围为闭区间
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub addresses: Vec<Address>,
    pub topic0: Option<B256>,
    pub from_block: u64,
    pub to_block: u64,
}

/// 一次合约调用或 dry run 的请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
}

/// 交给发送队列的任务，只在队列中短暂存在
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchJob {
    pub data: Bytes,
    pub gas_estimate: u64,
    pub transaction_reference: B256,
    pub to: Address,
}

/// 一对已部署的 home/foreign 桥，由映射合约事件写入注册表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeMapping {
    pub key: B256,
    pub home_bridge: Address,
    pub home_token: Address,
    pub home_start_block: u64,
    pub foreign_bridge: Address,
    pub foreign_token: Address,
    pub foreign_start_block: u64,
}

/// 每个 watcher 一份的处理进度
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherCursor {
    pub watcher_id: String,
    pub last_processed_block: u64,
}

impl WatcherCursor {
    pub fn new(watcher_id: impl Into<String>, last_processed_block: u64) -> Self {
        Self {
            watcher_id: watcher_id.into(),
            last_processed_block,
        }
    }
}
