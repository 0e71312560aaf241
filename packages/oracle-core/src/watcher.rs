//! 事件 watcher：每个轮询周期把链上新确认的区块范围变成一批待发送的交易
//!
//! 一轮的步骤为 计算窗口 -> 拉取事件 -> 处理 -> 推进游标，任一步失败都不推进游标，
//! 下一轮从同一个位置重试。下一轮在本轮结束后才开始计时，同一个 watcher 不会有两轮重叠。

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use crate::chain_adapter::ChainAdapter;
use crate::config::{Config, WatcherConfig};
use crate::context::BridgeContext;
use crate::contracts::EventKind;
use crate::processor::{self, EventProcessor};
use crate::queue::JobQueue;
use crate::store::CursorStore;
use crate::types::{BridgeMapping, ChainSide, LogFilter};
use crate::{Error, FatalError, Result};

pub const DEFAULT_HOME_CONFIRMATIONS: u64 = 1;
pub const DEFAULT_FOREIGN_CONFIRMATIONS: u64 = 2;

/// `[last + 1, head - confirmations]`，没有新的已确认区块时返回 `None`
pub fn compute_window(last_processed_block: u64, head: u64, confirmations: u64) -> Option<(u64, u64)> {
    let to_block = head.saturating_sub(confirmations);
    if to_block <= last_processed_block {
        return None;
    }
    Some((last_processed_block + 1, to_block))
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub id: String,
    pub kind: EventKind,
    pub event_contract: Address,
    pub start_block: u64,
    pub polling_interval: Duration,
    /// 固定的确认数，不设置时每轮从桥合约读取
    pub confirmations: Option<u64>,
    /// 单轮超时，`None` 不限制
    pub max_processing_time: Option<Duration>,
}

impl WatcherSettings {
    pub fn from_config(config: &Config, watcher: &WatcherConfig, ctx: &BridgeContext) -> Result<Self> {
        let chain = config.chain(watcher.kind.source_side());
        let event_contract = match (watcher.event_contract, watcher.kind) {
            (Some(address), _) => address,
            (None, EventKind::SignatureRequest | EventKind::CollectedSignatures) => ctx.home.address(),
            (None, EventKind::AffirmationRequest) => ctx.foreign.address(),
            (None, EventKind::InitiateChange) => ctx.home_validators.address(),
            (None, kind) => {
                return Err(Error::Config(format!(
                    "watcher {} ({kind}) needs an event_contract",
                    watcher.id
                )))
            }
        };
        Ok(Self {
            id: watcher.id.clone(),
            kind: watcher.kind,
            event_contract,
            start_block: chain.start_block,
            polling_interval: chain.polling_interval(),
            confirmations: chain.confirmations,
            max_processing_time: config.max_processing_time(),
        })
    }
}

pub struct Watcher {
    settings: WatcherSettings,
    ctx: Arc<BridgeContext>,
    chain: Arc<dyn ChainAdapter>,
    processor: Box<dyn EventProcessor>,
    queue: Option<Arc<dyn JobQueue>>,
    cursors: CursorStore,
}

impl Watcher {
    /// 注册表事件不产生交易，`queue` 可以为空
    pub fn new(settings: WatcherSettings, ctx: Arc<BridgeContext>, queue: Option<Arc<dyn JobQueue>>) -> Self {
        let chain = ctx.chain(settings.kind.source_side()).clone();
        let processor = processor::build(settings.kind, ctx.clone(), &settings.id);
        let cursors = CursorStore::new(ctx.store.clone());
        Self {
            settings,
            ctx,
            chain,
            processor,
            queue,
            cursors,
        }
    }

    pub fn id(&self) -> &str {
        &self.settings.id
    }

    async fn confirmations(&self) -> Result<u64> {
        if let Some(n) = self.settings.confirmations {
            return Ok(n);
        }
        let side = self.settings.kind.source_side();
        let read = match side {
            ChainSide::Home => self.ctx.home.required_block_confirmations().await,
            ChainSide::Foreign => self.ctx.foreign.required_block_confirmations().await,
        };
        match read {
            Ok(n) => Ok(n),
            Err(e @ Error::Rpc(_)) => Err(e),
            Err(e) => {
                let fallback = match side {
                    ChainSide::Home => DEFAULT_HOME_CONFIRMATIONS,
                    ChainSide::Foreign => DEFAULT_FOREIGN_CONFIRMATIONS,
                };
                warn!(error = %e, fallback, "Failed to read requiredBlockConfirmations");
                Ok(fallback)
            }
        }
    }

    /// 配置的事件合约，加上注册表中登记的其他 home bridge 或 foreign 代币
    async fn addresses(&self) -> Result<Vec<Address>> {
        let mut addresses = vec![self.settings.event_contract];
        let registered: fn(&BridgeMapping) -> Address = match self.settings.kind {
            kind if kind.emitted_by_home_bridge() => |m| m.home_bridge,
            EventKind::Transfer => |m| m.foreign_token,
            _ => return Ok(addresses),
        };
        for mapping in self.ctx.registry.all().await? {
            let address = registered(&mapping);
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }
        Ok(addresses)
    }

    /// 处理一轮，返回处理过的区块范围
    pub async fn tick(&self) -> Result<Option<(u64, u64)>> {
        let mut cursor = self.cursors.load(&self.settings.id, self.settings.start_block).await?;
        let head = self.chain.block_number().await?;
        let confirmations = self.confirmations().await?;
        let Some((from_block, to_block)) = compute_window(cursor.last_processed_block, head, confirmations) else {
            debug!(head, last_processed_block = cursor.last_processed_block, "All blocks already processed");
            return Ok(None);
        };

        let filter = LogFilter {
            addresses: self.addresses().await?,
            topic0: Some(self.settings.kind.topic0()),
            from_block,
            to_block,
        };
        let mut events = self.chain.get_logs(&filter).await?;
        events.sort_by_key(|e| (e.block_number, e.log_index));
        info!(from_block, to_block, "Found {} {} events", events.len(), self.settings.kind);

        let jobs = self.processor.process(events, head).await?;
        if !jobs.is_empty() {
            match &self.queue {
                Some(queue) => queue.send(jobs).await?,
                None => warn!(jobs = jobs.len(), "No queue configured, dropping jobs"),
            }
        }

        cursor.last_processed_block = to_block;
        self.cursors.save(&cursor).await?;
        debug!(last_processed_block = to_block, "Updated last processed block");
        Ok(Some((from_block, to_block)))
    }

    async fn guarded_tick(&self) -> Result<Option<(u64, u64)>> {
        let Some(limit) = self.settings.max_processing_time else {
            return self.tick().await;
        };
        match tokio::time::timeout(limit, self.tick()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(limit_ms = limit.as_millis() as u64, "Max processing time reached");
                Err(Error::Fatal(FatalError::MaxProcessingTime))
            }
        }
    }

    /// 循环到收到关闭信号；只有致命错误会让它提前返回
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let span = tracing::info_span!("watcher", watcher = %self.settings.id);
        async move {
            info!(kind = %self.settings.kind, contract = %self.settings.event_contract, "Watcher started");
            loop {
                match self.guarded_tick().await {
                    Ok(_) => {}
                    Err(e @ Error::Fatal(_)) => return Err(e),
                    Err(e) => error!(error = %e, "Tick failed, retrying on the next interval"),
                }
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.polling_interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
            info!("Watcher stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
