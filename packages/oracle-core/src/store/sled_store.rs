use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use log::info;

use super::KeyValueStore;
use crate::{Error, Result};

const VALUE_PREFIX: &str = "v:";
const HASH_PREFIX: &str = "h:";
const FIELD_SEPARATOR: char = '\0';

/// 基于 sled 的本地持久化存储
///
/// 普通键存为 `v:{key}`，哈希字段存为 `h:{key}\0{field}`，
/// 读取整个哈希时按前缀扫描。
pub struct SledStore {
    db: sled::Db,
}

fn store_err(e: sled::Error) -> Error {
    Error::Store(e.to_string())
}

fn utf8(raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec()).map_err(|e| Error::Store(format!("non utf-8 value: {e}")))
}

fn hash_prefix(key: &str) -> String {
    format!("{HASH_PREFIX}{key}{FIELD_SEPARATOR}")
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref()).map_err(store_err)?;
        info!("Opened state store at {}", path.as_ref().display());
        Ok(Self { db })
    }

    async fn flush(&self) -> Result<()> {
        self.db.flush_async().await.map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SledStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.db.get(format!("{VALUE_PREFIX}{key}")).map_err(store_err)? {
            Some(raw) => Ok(Some(utf8(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .insert(format!("{VALUE_PREFIX}{key}"), value.as_bytes())
            .map_err(store_err)?;
        self.flush().await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.db.remove(format!("{VALUE_PREFIX}{key}")).map_err(store_err)?;
        for entry in self.db.scan_prefix(hash_prefix(key)).keys() {
            self.db.remove(entry.map_err(store_err)?).map_err(store_err)?;
        }
        self.flush().await
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let prefix = hash_prefix(key);
        let mut fields = HashMap::new();
        for entry in self.db.scan_prefix(&prefix) {
            let (raw_key, raw_value) = entry.map_err(store_err)?;
            let full = utf8(&raw_key)?;
            let field = full[prefix.len()..].to_string();
            fields.insert(field, utf8(&raw_value)?);
        }
        Ok(fields)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.db
            .insert(format!("{}{field}", hash_prefix(key)), value.as_bytes())
            .map_err(store_err)?;
        self.flush().await
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        self.db
            .remove(format!("{}{field}", hash_prefix(key)))
            .map_err(store_err)?;
        self.flush().await
    }
}
