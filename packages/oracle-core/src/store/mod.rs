//! 共享键值存储
//!
//! 保存 watcher 进度、桥注册表、轮换提示和等待中的中继事件。
//! 这里没有事务保证，多个验证者进程并发读写轮换提示键时以最后一次写入为准，
//! 正确性只依赖目标链上的已中继记录。

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::types::{BridgeMapping, ChainEvent, WatcherCursor};
use crate::{Error, Result};

pub mod memory;
pub mod sled_store;

pub use memory::InMemoryStore;
pub use sled_store::SledStore;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hdel(&self, key: &str, field: &str) -> Result<()>;
}

pub fn last_processed_block_key(watcher_id: &str) -> String {
    format!("{watcher_id}:lastProcessedBlock")
}

pub fn rotation_hint_key(watcher_id: &str, tx_hash: B256) -> String {
    format!("{watcher_id}:lastAuthorityTryingToRelay:{tx_hash}")
}

pub fn pending_relays_key(watcher_id: &str) -> String {
    format!("{watcher_id}:pendingRelays")
}

/// watcher 进度的读写
#[derive(Clone)]
pub struct CursorStore {
    store: Arc<dyn KeyValueStore>,
}

impl CursorStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// 首次运行时以 `max(start_block - 1, 0)` 作为起点
    pub async fn load(&self, watcher_id: &str, start_block: u64) -> Result<WatcherCursor> {
        let key = last_processed_block_key(watcher_id);
        let last = match self.store.get(&key).await? {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|e| Error::Store(format!("invalid value under {key}: {e}")))?,
            None => start_block.saturating_sub(1),
        };
        debug!("Last processed block for {} is {}", watcher_id, last);
        Ok(WatcherCursor::new(watcher_id, last))
    }

    pub async fn save(&self, cursor: &WatcherCursor) -> Result<()> {
        self.store
            .set(
                &last_processed_block_key(&cursor.watcher_id),
                &cursor.last_processed_block.to_string(),
            )
            .await
    }
}

/// 已部署桥对的注册表，整个哈希表存在一个键下
#[derive(Clone)]
pub struct BridgeRegistry {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl BridgeRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// 同一个 key 的映射整体替换
    pub async fn upsert(&self, mapping: &BridgeMapping) -> Result<()> {
        let json = serde_json::to_string(mapping)?;
        self.store.hset(&self.key, &mapping.key.to_string(), &json).await
    }

    pub async fn all(&self) -> Result<Vec<BridgeMapping>> {
        let entries = self.store.hget_all(&self.key).await?;
        let mut mappings = Vec::with_capacity(entries.len());
        for (field, raw) in entries {
            match serde_json::from_str::<BridgeMapping>(&raw) {
                Ok(mapping) => mappings.push(mapping),
                Err(e) => warn!("Skipping malformed bridge mapping {}: {}", field, e),
            }
        }
        mappings.sort_by_key(|m| m.key);
        Ok(mappings)
    }

    pub async fn find_by_foreign_bridge(&self, foreign_bridge: Address) -> Result<Option<BridgeMapping>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .find(|m| m.foreign_bridge == foreign_bridge))
    }

    pub async fn find_by_home_bridge(&self, home_bridge: Address) -> Result<Option<BridgeMapping>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .find(|m| m.home_bridge == home_bridge))
    }
}

/// 上一次轮换算出的候选者，以及当时已经过去的超时周期数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationHint {
    pub authority: Address,
    pub step: u64,
}

/// 等待重评估的事件，`failures` 是连续评估失败的轮数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRelay {
    pub event: ChainEvent,
    #[serde(default)]
    pub failures: u32,
}

impl PendingRelay {
    pub fn new(event: ChainEvent) -> Self {
        Self { event, failures: 0 }
    }
}

/// 某个 watcher 的中继协调状态：轮换提示和等待重评估的事件
#[derive(Clone)]
pub struct RelayState {
    store: Arc<dyn KeyValueStore>,
    watcher_id: String,
}

impl RelayState {
    pub fn new(store: Arc<dyn KeyValueStore>, watcher_id: impl Into<String>) -> Self {
        Self {
            store,
            watcher_id: watcher_id.into(),
        }
    }

    pub async fn rotation_hint(&self, tx_hash: B256) -> Result<Option<RotationHint>> {
        let key = rotation_hint_key(&self.watcher_id, tx_hash);
        match self.store.get(&key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| Error::Store(format!("invalid rotation hint under {key}: {e}"))),
            None => Ok(None),
        }
    }

    pub async fn set_rotation_hint(&self, tx_hash: B256, hint: &RotationHint) -> Result<()> {
        let json = serde_json::to_string(hint)?;
        self.store.set(&rotation_hint_key(&self.watcher_id, tx_hash), &json).await
    }

    pub async fn clear_rotation_hint(&self, tx_hash: B256) -> Result<()> {
        self.store.delete(&rotation_hint_key(&self.watcher_id, tx_hash)).await
    }

    pub async fn pending_relays(&self) -> Result<Vec<PendingRelay>> {
        let entries = self.store.hget_all(&pending_relays_key(&self.watcher_id)).await?;
        let mut relays = Vec::with_capacity(entries.len());
        for (field, raw) in entries {
            // 旧记录只有事件本身
            let parsed = serde_json::from_str::<PendingRelay>(&raw)
                .or_else(|_| serde_json::from_str::<ChainEvent>(&raw).map(PendingRelay::new));
            match parsed {
                Ok(relay) => relays.push(relay),
                Err(e) => warn!("Dropping malformed pending relay {}: {}", field, e),
            }
        }
        relays.sort_by_key(|r| (r.event.block_number, r.event.log_index));
        Ok(relays)
    }

    pub async fn pending(&self) -> Result<Vec<ChainEvent>> {
        Ok(self.pending_relays().await?.into_iter().map(|r| r.event).collect())
    }

    /// 同一交易哈希的记录整体替换
    pub async fn put_pending(&self, relay: &PendingRelay) -> Result<()> {
        let json = serde_json::to_string(relay)?;
        self.store
            .hset(
                &pending_relays_key(&self.watcher_id),
                &relay.event.transaction_hash.to_string(),
                &json,
            )
            .await
    }

    pub async fn add_pending(&self, event: &ChainEvent) -> Result<()> {
        self.put_pending(&PendingRelay::new(event.clone())).await
    }

    pub async fn remove_pending(&self, tx_hash: B256) -> Result<()> {
        self.store
            .hdel(&pending_relays_key(&self.watcher_id), &tx_hash.to_string())
            .await
    }
}
