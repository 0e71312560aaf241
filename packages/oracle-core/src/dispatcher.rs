//! 交易发送：每条目标链一个 dispatcher，是该链上 nonce 的唯一写入者
//!
//! 每批任务开始时读取一次链上 nonce，之后只在本地递增，批内不重新读取。
//! 单个任务发送失败只记录日志，不影响同批其他任务，nonce 只在发送成功后前进。
//! 发送前的准备步骤（余额、chain id、nonce）因节点故障失败时整批退避重试，不会丢弃。

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use backoff::ExponentialBackoffBuilder;
use tokio::sync::{mpsc, watch, OnceCell};
use tracing::{debug, error, info, warn, Instrument};

use crate::chain_adapter::ChainAdapter;
use crate::config::Config;
use crate::estimator::add_extra_gas;
use crate::gas_price::GasPriceOracle;
use crate::signer::{LegacyTransaction, ValidatorSigner};
use crate::types::{ChainSide, DispatchJob};
use crate::{Error, Result};

/// 余额检查的重试参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundsCheck {
    pub min_balance: U256,
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl FundsCheck {
    pub fn disabled() -> Self {
        Self {
            min_balance: U256::ZERO,
            min_interval: Duration::from_secs(60),
            max_interval: Duration::from_secs(30 * 60),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            min_balance: U256::from(config.relayer.min_balance_wei),
            min_interval: Duration::from_millis(config.relayer.funds_backoff_min_ms),
            max_interval: Duration::from_millis(config.relayer.funds_backoff_max_ms),
        }
    }
}

/// 余额达到 `min_balance` 之前一直等待，读取失败也会重试
pub async fn wait_for_funds(chain: &dyn ChainAdapter, address: Address, check: &FundsCheck) -> Result<U256> {
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(check.min_interval)
        .with_max_interval(check.max_interval)
        .with_randomization_factor(0.0)
        .with_max_elapsed_time(None)
        .build();
    let task = || async move {
        let balance = chain.balance(address).await.map_err(backoff::Error::transient)?;
        if balance >= check.min_balance {
            debug!(%balance, minimum = %check.min_balance, "Validator has minimum necessary balance");
            Ok(balance)
        } else {
            debug!(%balance, minimum = %check.min_balance, "Balance of validator is still less than the minimum");
            Err(backoff::Error::transient(Error::Chain(format!(
                "balance {balance} below minimum {}",
                check.min_balance
            ))))
        }
    };
    backoff::future::retry(policy, task).await
}

/// 一批任务的发送结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// 已提交交易的哈希
    pub sent: Vec<B256>,
    /// 发送失败任务的 `transaction_reference`
    pub failed: Vec<B256>,
}

/// 整批重试的初始和最大间隔
pub const DEFAULT_RETRY_MIN: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_MAX: Duration = Duration::from_secs(60);

/// 节点不可达或返回错误时，整批都还没有发出，可以安全重试
fn is_transient(e: &Error) -> bool {
    matches!(e, Error::Rpc(_) | Error::Chain(_))
}

pub struct Dispatcher {
    side: ChainSide,
    chain: Arc<dyn ChainAdapter>,
    signer: ValidatorSigner,
    gas_price: Arc<GasPriceOracle>,
    extra_gas_percentage: f64,
    funds: FundsCheck,
    chain_id: OnceCell<u64>,
    retry_min: Duration,
    retry_max: Duration,
}

impl Dispatcher {
    pub fn new(
        side: ChainSide,
        chain: Arc<dyn ChainAdapter>,
        signer: ValidatorSigner,
        gas_price: Arc<GasPriceOracle>,
        extra_gas_percentage: f64,
    ) -> Self {
        Self {
            side,
            chain,
            signer,
            gas_price,
            extra_gas_percentage,
            funds: FundsCheck::disabled(),
            chain_id: OnceCell::new(),
            retry_min: DEFAULT_RETRY_MIN,
            retry_max: DEFAULT_RETRY_MAX,
        }
    }

    pub fn with_funds_check(mut self, funds: FundsCheck) -> Self {
        self.funds = funds;
        self
    }

    /// 配置里给定 chain id 时不再向节点查询
    pub fn with_chain_id(self, chain_id: Option<u64>) -> Self {
        if let Some(id) = chain_id {
            let _ = self.chain_id.set(id);
        }
        self
    }

    pub fn with_retry_intervals(mut self, min: Duration, max: Duration) -> Self {
        self.retry_min = min;
        self.retry_max = max.max(min);
        self
    }

    pub fn side(&self) -> ChainSide {
        self.side
    }

    async fn chain_id(&self) -> Result<u64> {
        self.chain_id
            .get_or_try_init(|| self.chain.chain_id())
            .await
            .copied()
    }

    pub async fn dispatch(&self, jobs: Vec<DispatchJob>) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        if jobs.is_empty() {
            return Ok(report);
        }
        let from = self.signer.address();
        if self.funds.min_balance > U256::ZERO {
            wait_for_funds(self.chain.as_ref(), from, &self.funds).await?;
        }

        let chain_id = self.chain_id().await?;
        let mut nonce = self.chain.transaction_count(from).await?;
        let gas_price = self.gas_price.price().await;
        info!(jobs = jobs.len(), nonce, %gas_price, "Sending transactions");

        for job in jobs {
            let gas_limit = add_extra_gas(job.gas_estimate, self.extra_gas_percentage);
            let tx = LegacyTransaction {
                nonce,
                gas_price,
                gas_limit,
                to: job.to,
                value: U256::ZERO,
                data: job.data,
                chain_id,
            };
            let sent = match self.signer.sign_transaction(&tx) {
                Ok(raw) => self.chain.send_raw_transaction(raw).await,
                Err(e) => Err(e),
            };
            match sent {
                Ok(tx_hash) => {
                    info!(
                        tx_reference = %job.transaction_reference,
                        %tx_hash,
                        nonce,
                        gas_limit,
                        "Tx generated for event Tx {}",
                        job.transaction_reference
                    );
                    nonce += 1;
                    report.sent.push(tx_hash);
                }
                Err(e) => {
                    error!(
                        tx_reference = %job.transaction_reference,
                        nonce,
                        error = %e,
                        "Tx Failed for event Tx {}",
                        job.transaction_reference
                    );
                    report.failed.push(job.transaction_reference);
                }
            }
        }
        Ok(report)
    }

    /// 准备步骤遇到节点故障时退避重试，直到成功或遇到不可重试的错误
    pub async fn dispatch_with_retry(&self, jobs: Vec<DispatchJob>) -> Result<DispatchReport> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry_min)
            .with_max_interval(self.retry_max)
            .with_max_elapsed_time(None)
            .build();
        let jobs = &jobs;
        let task = || async move {
            self.dispatch(jobs.clone()).await.map_err(|e| {
                if is_transient(&e) {
                    warn!(error = %e, jobs = jobs.len(), "Failed to prepare batch, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        };
        backoff::future::retry(policy, task).await
    }

    /// 消费队列直到队列关闭或收到关闭信号
    pub async fn run(self, mut jobs: mpsc::Receiver<Vec<DispatchJob>>, mut shutdown: watch::Receiver<bool>) {
        let span = tracing::info_span!("dispatcher", chain = %self.side);
        async move {
            info!("Dispatcher started");
            loop {
                tokio::select! {
                    batch = jobs.recv() => match batch {
                        Some(batch) => tokio::select! {
                            outcome = self.dispatch_with_retry(batch) => {
                                if let Err(e) = outcome {
                                    error!(error = %e, "Failed to dispatch batch");
                                }
                            }
                            _ = shutdown.changed() => break,
                        },
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            info!("Dispatcher stopped");
        }
        .instrument(span)
        .await
    }
}
