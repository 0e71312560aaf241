use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::types::ChainSide;
use crate::{Error, Result};

const WEI_PER_GWEI: f64 = 1_000_000_000.0;

/// gas price 的外部来源
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GasPriceSource: Send + Sync {
    /// 返回以 wei 计的价格
    async fn fetch(&self) -> Result<U256>;
}

/// 返回 `{"<speed>": <gwei>}` 形式 JSON 的 HTTP oracle
pub struct HttpGasPriceSource {
    client: reqwest::Client,
    url: String,
    speed_type: String,
    factor: Option<f64>,
}

impl HttpGasPriceSource {
    pub fn new(url: impl Into<String>, speed_type: impl Into<String>, factor: Option<f64>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            speed_type: speed_type.into(),
            factor,
        }
    }
}

fn gwei_to_wei(gwei: f64) -> U256 {
    U256::from((gwei * WEI_PER_GWEI).round() as u128)
}

#[async_trait]
impl GasPriceSource for HttpGasPriceSource {
    async fn fetch(&self) -> Result<U256> {
        let json: serde_json::Value = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Rpc(format!("gas price oracle {}: {e}", self.url)))?
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("gas price oracle {}: {e}", self.url)))?;

        let gwei = json
            .get(&self.speed_type)
            .and_then(|v| v.as_f64())
            .filter(|v| *v > 0.0)
            .ok_or_else(|| {
                Error::Chain(format!(
                    "Response from oracle didn't include gas price for {} type",
                    self.speed_type
                ))
            })?;
        let gwei = match self.factor {
            Some(factor) => (gwei * factor).ceil(),
            None => gwei,
        };
        Ok(gwei_to_wei(gwei))
    }
}

/// 缓存的 gas price，初始为静态回退值，由后台任务定期刷新
pub struct GasPriceOracle {
    side: ChainSide,
    cached: RwLock<U256>,
    primary: Option<Arc<dyn GasPriceSource>>,
    secondary: Option<Arc<dyn GasPriceSource>>,
    update_interval: Duration,
}

impl GasPriceOracle {
    pub fn fixed(side: ChainSide, price: U256) -> Self {
        Self {
            side,
            cached: RwLock::new(price),
            primary: None,
            secondary: None,
            update_interval: Duration::from_secs(600),
        }
    }

    pub fn with_sources(
        side: ChainSide,
        fallback: U256,
        primary: Arc<dyn GasPriceSource>,
        secondary: Option<Arc<dyn GasPriceSource>>,
        update_interval: Duration,
    ) -> Self {
        Self {
            side,
            cached: RwLock::new(fallback),
            primary: Some(primary),
            secondary,
            update_interval,
        }
    }

    pub async fn price(&self) -> U256 {
        *self.cached.read().await
    }

    /// 主源失败时尝试备用源，两者都失败则保留旧值
    pub async fn refresh(&self) -> Result<U256> {
        let Some(primary) = &self.primary else {
            return Ok(self.price().await);
        };
        let price = match primary.fetch().await {
            Ok(price) => price,
            Err(e) => {
                error!(chain = %self.side, error = %e, "Primary gas price API is not available");
                match &self.secondary {
                    Some(secondary) => {
                        info!(chain = %self.side, "Using the secondary gas price API");
                        secondary.fetch().await?
                    }
                    None => return Err(e),
                }
            }
        };
        *self.cached.write().await = price;
        debug!(chain = %self.side, %price, "Gas price updated");
        Ok(price)
    }

    /// 立即刷新一次，然后按间隔刷新直到收到关闭信号
    pub fn spawn_refresher(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        self.primary.as_ref()?;
        Some(tokio::spawn(async move {
            loop {
                if let Err(e) = self.refresh().await {
                    error!(chain = %self.side, error = %e, "Gas price refresh failed, keeping cached value");
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.update_interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }))
    }
}
