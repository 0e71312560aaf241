use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::KeyValueStore;
use crate::Result;

/// 进程内存储，用于测试和不需要持久化的临时运行
#[derive(Default)]
pub struct InMemoryStore {
    values: RwLock<HashMap<String, String>>,
    hashes: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        self.hashes.write().await.remove(key);
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.hashes.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.hashes
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut hashes = self.hashes.write().await;
        if let Some(hash) = hashes.get_mut(key) {
            hash.remove(field);
            if hash.is_empty() {
                hashes.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_operations() {
        let store = InMemoryStore::new();
        store.hset("h", "a", "1").await.unwrap();
        store.hset("h", "b", "2").await.unwrap();
        store.hset("h", "a", "3").await.unwrap();

        let all = store.hget_all("h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("a").map(String::as_str), Some("3"));

        store.hdel("h", "a").await.unwrap();
        store.hdel("h", "missing").await.unwrap();
        assert_eq!(store.hget_all("h").await.unwrap().len(), 1);
        assert!(store.hget_all("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_plain_values() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
