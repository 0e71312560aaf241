use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

use crate::{
    config::ChainConfig,
    types::{CallRequest, ChainEvent, ChainSide, LogFilter},
    Result,
};

/// 链适配器特征，定义了中继与一条链交互所需的全部读写操作
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// 当前区块高度
    async fn block_number(&self) -> Result<u64>;

    /// 按地址和 topic0 查询闭区间内的事件
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<ChainEvent>>;

    /// 已上链交易收据中的全部日志
    async fn transaction_logs(&self, tx_hash: B256) -> Result<Vec<ChainEvent>>;

    /// 在最新区块上执行只读调用
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    /// dry run，回滚时返回 [`crate::Error::Reverted`]
    async fn estimate_gas(&self, request: CallRequest) -> Result<u64>;

    async fn transaction_count(&self, address: Address) -> Result<u64>;

    async fn chain_id(&self) -> Result<u64>;

    async fn balance(&self, address: Address) -> Result<U256>;

    /// 广播已签名的交易，返回交易哈希
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256>;
}

/// 链适配器工厂，按配置创建某一端的适配器实例
pub trait ChainAdapterFactory {
    fn create_adapter(&self, side: ChainSide, config: &ChainConfig) -> Result<Arc<dyn ChainAdapter>>;
}

pub struct DefaultChainAdapterFactory;

impl ChainAdapterFactory for DefaultChainAdapterFactory {
    fn create_adapter(&self, side: ChainSide, config: &ChainConfig) -> Result<Arc<dyn ChainAdapter>> {
        let adapter = EvmAdapter::new(side, config.rpc_urls.clone(), config.request_timeout())?;
        Ok(Arc::new(adapter))
    }
}

pub mod evm;

pub use evm::EvmAdapter;
