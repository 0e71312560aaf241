use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::contracts::EventKind;
use crate::coordinator::RotationStrategy;
use crate::gas_price::{GasPriceOracle, GasPriceSource, HttpGasPriceSource};
use crate::signer::ValidatorSigner;
use crate::types::ChainSide;
use crate::{Error, Result};

pub const DEFAULT_PRIVATE_KEY_ENV: &str = "VALIDATOR_ADDRESS_PRIVATE_KEY";
pub const DEFAULT_DEPLOYED_BRIDGES_KEY: &str = "deployed:bridges";

fn default_private_key_env() -> String {
    DEFAULT_PRIVATE_KEY_ENV.to_string()
}

fn default_polling_interval_ms() -> u64 {
    5_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_speed_type() -> String {
    "standard".to_string()
}

fn default_gas_update_interval_ms() -> u64 {
    600_000
}

fn default_fallback_gas_price() -> u64 {
    1_000_000_000
}

fn default_max_concurrent_events() -> usize {
    50
}

fn default_extra_gas_percentage() -> f64 {
    0.25
}

fn default_relay_timeout_blocks() -> u64 {
    100
}

fn default_max_pending_failures() -> u32 {
    5
}

fn default_store_path() -> String {
    "oracle-db".to_string()
}

fn default_deployed_bridges_key() -> String {
    DEFAULT_DEPLOYED_BRIDGES_KEY.to_string()
}

fn default_funds_backoff_min_ms() -> u64 {
    60_000
}

fn default_funds_backoff_max_ms() -> u64 {
    30 * 60_000
}

fn default_queue_capacity() -> usize {
    100
}

/// 验证者身份；私钥直接写在配置里，或从环境变量读取
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ValidatorConfig {
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            address: None,
            private_key: None,
            private_key_env: default_private_key_env(),
        }
    }
}

impl ValidatorConfig {
    pub fn signer(&self) -> Result<ValidatorSigner> {
        let key = match &self.private_key {
            Some(key) => key.clone(),
            None => std::env::var(&self.private_key_env).map_err(|_| {
                Error::Config(format!(
                    "validator private key is not configured and {} is not set",
                    self.private_key_env
                ))
            })?,
        };
        let signer = ValidatorSigner::from_hex(&key)?;
        if let Some(address) = self.address {
            if address != signer.address() {
                return Err(Error::Config(format!(
                    "validator address {address} does not match the private key ({})",
                    signer.address()
                )));
            }
        }
        Ok(signer)
    }
}

/// gas price oracle 设置，数值单位为 wei
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GasPriceConfig {
    #[serde(default = "default_fallback_gas_price")]
    pub fallback: u64,
    #[serde(default)]
    pub oracle_url: Option<String>,
    #[serde(default)]
    pub secondary_oracle_url: Option<String>,
    #[serde(default = "default_speed_type")]
    pub speed_type: String,
    #[serde(default)]
    pub factor: Option<f64>,
    #[serde(default = "default_gas_update_interval_ms")]
    pub update_interval_ms: u64,
}

impl Default for GasPriceConfig {
    fn default() -> Self {
        Self {
            fallback: default_fallback_gas_price(),
            oracle_url: None,
            secondary_oracle_url: None,
            speed_type: default_speed_type(),
            factor: None,
            update_interval_ms: default_gas_update_interval_ms(),
        }
    }
}

impl GasPriceConfig {
    /// 没有配置 oracle 地址时只使用固定的回退值
    pub fn build_oracle(&self, side: ChainSide) -> GasPriceOracle {
        let fallback = U256::from(self.fallback);
        let Some(url) = &self.oracle_url else {
            return GasPriceOracle::fixed(side, fallback);
        };
        let primary = Arc::new(HttpGasPriceSource::new(url.clone(), self.speed_type.clone(), self.factor));
        let secondary = self.secondary_oracle_url.as_ref().map(|url| {
            Arc::new(HttpGasPriceSource::new(url.clone(), self.speed_type.clone(), self.factor)) as Arc<dyn GasPriceSource>
        });
        GasPriceOracle::with_sources(
            side,
            fallback,
            primary,
            secondary,
            Duration::from_millis(self.update_interval_ms),
        )
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChainConfig {
    pub rpc_urls: Vec<String>,
    pub bridge_address: Address,
    /// 不设置时从桥合约读取 `requiredBlockConfirmations`
    #[serde(default)]
    pub confirmations: Option<u64>,
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default)]
    pub start_block: u64,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub gas_price: GasPriceConfig,
}

impl ChainConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelayerConfig {
    /// 单轮处理的最长时间，0 表示不限制；不设置时为两条链轮询间隔较大者的 4 倍
    #[serde(default)]
    pub max_processing_time_ms: Option<u64>,
    #[serde(default = "default_max_concurrent_events")]
    pub max_concurrent_events: usize,
    #[serde(default = "default_extra_gas_percentage")]
    pub extra_gas_percentage: f64,
    #[serde(default = "default_relay_timeout_blocks")]
    pub relay_timeout_blocks: u64,
    #[serde(default)]
    pub rotation_strategy: RotationStrategy,
    /// 等待集合中的事件连续评估失败超过该轮数后丢弃
    #[serde(default = "default_max_pending_failures")]
    pub max_pending_failures: u32,
    #[serde(default)]
    pub allow_http: bool,
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default = "default_deployed_bridges_key")]
    pub deployed_bridges_key: String,
    #[serde(default)]
    pub min_balance_wei: u128,
    #[serde(default = "default_funds_backoff_min_ms")]
    pub funds_backoff_min_ms: u64,
    #[serde(default = "default_funds_backoff_max_ms")]
    pub funds_backoff_max_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            max_processing_time_ms: None,
            max_concurrent_events: default_max_concurrent_events(),
            extra_gas_percentage: default_extra_gas_percentage(),
            relay_timeout_blocks: default_relay_timeout_blocks(),
            rotation_strategy: RotationStrategy::default(),
            max_pending_failures: default_max_pending_failures(),
            allow_http: false,
            store_path: default_store_path(),
            deployed_bridges_key: default_deployed_bridges_key(),
            min_balance_wei: 0,
            funds_backoff_min_ms: default_funds_backoff_min_ms(),
            funds_backoff_max_ms: default_funds_backoff_max_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    pub id: String,
    pub kind: EventKind,
    /// 不设置时使用该事件种类的默认合约
    #[serde(default)]
    pub event_contract: Option<Address>,
}

impl WatcherConfig {
    /// 这些事件来自桥合约之外的独立合约，必须显式配置地址
    pub fn requires_event_contract(&self) -> bool {
        matches!(
            self.kind,
            EventKind::UpgradeBridge | EventKind::BridgeMapping | EventKind::Transfer | EventKind::RewardedOnCycle
        )
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub validator: ValidatorConfig,
    pub home: ChainConfig,
    pub foreign: ChainConfig,
    #[serde(default)]
    pub relayer: RelayerConfig,
    #[serde(default)]
    pub watchers: Vec<WatcherConfig>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&config_str)?;
        info!("Loaded config from {} with {} watchers", path.display(), config.watchers.len());
        Ok(config)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(config_str).map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (side, chain) in [(ChainSide::Home, &self.home), (ChainSide::Foreign, &self.foreign)] {
            if chain.rpc_urls.is_empty() {
                return Err(Error::Config(format!("{side} chain has no rpc urls")));
            }
            for url in &chain.rpc_urls {
                if url.starts_with("https://") {
                    continue;
                }
                if !url.starts_with("http://") {
                    return Err(Error::Config(format!("Invalid {side} rpc url: {url}")));
                }
                if !self.relayer.allow_http {
                    return Err(Error::Config(format!(
                        "{side} rpc url {url} is not https; set relayer.allow_http to use it"
                    )));
                }
                warn!("Using insecure http rpc url for {} chain: {}", side, url);
            }
            if chain.polling_interval_ms == 0 {
                return Err(Error::Config(format!("{side} polling interval must be greater than 0")));
            }
        }

        if !(self.relayer.extra_gas_percentage >= 0.0) {
            return Err(Error::Config("extra gas percentage must not be negative".to_string()));
        }
        if self.relayer.funds_backoff_min_ms > self.relayer.funds_backoff_max_ms {
            return Err(Error::Config("funds backoff min interval exceeds max interval".to_string()));
        }

        if self.watchers.is_empty() {
            return Err(Error::Config("at least one watcher must be configured".to_string()));
        }
        let mut ids = HashSet::new();
        for watcher in &self.watchers {
            if !ids.insert(watcher.id.as_str()) {
                return Err(Error::Config(format!("Duplicate watcher id: {}", watcher.id)));
            }
            if watcher.requires_event_contract() && watcher.event_contract.is_none() {
                return Err(Error::Config(format!(
                    "watcher {} ({}) needs an event_contract",
                    watcher.id, watcher.kind
                )));
            }
        }

        self.validator.signer()?;
        Ok(())
    }

    pub fn chain(&self, side: ChainSide) -> &ChainConfig {
        match side {
            ChainSide::Home => &self.home,
            ChainSide::Foreign => &self.foreign,
        }
    }

    /// `None` 表示不启用 watchdog
    pub fn max_processing_time(&self) -> Option<Duration> {
        let ms = self.relayer.max_processing_time_ms.unwrap_or_else(|| {
            4 * self.home.polling_interval_ms.max(self.foreign.polling_interval_ms)
        });
        (ms > 0).then(|| Duration::from_millis(ms))
    }

    pub fn get_watcher(&self, id: &str) -> Option<&WatcherConfig> {
        self.watchers.iter().find(|w| w.id == id)
    }
}
