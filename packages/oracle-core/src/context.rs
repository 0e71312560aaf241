use std::sync::Arc;

use alloy_primitives::Address;
use log::{debug, info};

use crate::chain_adapter::ChainAdapter;
use crate::config::Config;
use crate::contracts::{ForeignBridge, HomeBridge, ValidatorSet};
use crate::coordinator::RotationStrategy;
use crate::signer::ValidatorSigner;
use crate::store::{BridgeRegistry, KeyValueStore};
use crate::types::ChainSide;
use crate::Result;

/// 构建上下文所需的配置项
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub home_bridge: Address,
    pub foreign_bridge: Address,
    pub deployed_bridges_key: String,
    pub max_concurrent_events: usize,
    pub relay_timeout_blocks: u64,
    pub rotation_strategy: RotationStrategy,
    pub max_pending_failures: u32,
}

impl From<&Config> for ContextOptions {
    fn from(config: &Config) -> Self {
        Self {
            home_bridge: config.home.bridge_address,
            foreign_bridge: config.foreign.bridge_address,
            deployed_bridges_key: config.relayer.deployed_bridges_key.clone(),
            max_concurrent_events: config.relayer.max_concurrent_events,
            relay_timeout_blocks: config.relayer.relay_timeout_blocks,
            rotation_strategy: config.relayer.rotation_strategy,
            max_pending_failures: config.relayer.max_pending_failures,
        }
    }
}

/// 进程级上下文：启动时解析一次的合约句柄和常量，显式传给每个组件
pub struct BridgeContext {
    pub home: HomeBridge,
    pub foreign: ForeignBridge,
    pub home_validators: ValidatorSet,
    pub foreign_validators: ValidatorSet,
    /// 转账消息的字节长度，启动时从 home bridge 读取
    pub expected_message_length: usize,
    pub signer: ValidatorSigner,
    pub store: Arc<dyn KeyValueStore>,
    pub registry: BridgeRegistry,
    pub max_concurrent_events: usize,
    pub relay_timeout_blocks: u64,
    pub rotation_strategy: RotationStrategy,
    pub max_pending_failures: u32,
}

impl BridgeContext {
    pub async fn resolve(
        home_chain: Arc<dyn ChainAdapter>,
        foreign_chain: Arc<dyn ChainAdapter>,
        options: ContextOptions,
        signer: ValidatorSigner,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let home = HomeBridge::new(home_chain.clone(), options.home_bridge);
        let foreign = ForeignBridge::new(foreign_chain.clone(), options.foreign_bridge);

        debug!("Getting validator contract addresses");
        let home_validators = ValidatorSet::new(home_chain, home.validator_contract().await?);
        let foreign_validators = ValidatorSet::new(foreign_chain, foreign.validator_contract().await?);
        let expected_message_length = home.required_message_length().await?;
        info!(
            "Resolved bridge context: home validators {}, foreign validators {}, message length {}",
            home_validators.address(),
            foreign_validators.address(),
            expected_message_length
        );

        Ok(Self {
            home,
            foreign,
            home_validators,
            foreign_validators,
            expected_message_length,
            signer,
            registry: BridgeRegistry::new(store.clone(), options.deployed_bridges_key),
            store,
            max_concurrent_events: options.max_concurrent_events.max(1),
            relay_timeout_blocks: options.relay_timeout_blocks,
            rotation_strategy: options.rotation_strategy,
            max_pending_failures: options.max_pending_failures,
        })
    }

    pub fn validator_address(&self) -> Address {
        self.signer.address()
    }

    pub fn chain(&self, side: ChainSide) -> &Arc<dyn ChainAdapter> {
        match side {
            ChainSide::Home => self.home.chain(),
            ChainSide::Foreign => self.foreign.chain(),
        }
    }

    /// 注册表中 home bridge 对应的 foreign bridge，没有登记时用配置的那一对
    pub async fn foreign_bridge_for(&self, home_bridge: Address) -> Result<ForeignBridge> {
        if home_bridge == self.home.address() {
            return Ok(self.foreign.clone());
        }
        Ok(match self.registry.find_by_home_bridge(home_bridge).await? {
            Some(mapping) => self.foreign.at(mapping.foreign_bridge),
            None => self.foreign.clone(),
        })
    }
}
