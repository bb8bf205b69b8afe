use anyhow::{Context, Result};
use async_trait::async_trait;
use rocksdb::{DB, Options};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// String key/value store backing the signature and public-parameter caches.
///
/// Writes are last-write-wins per key. Implementations must never expose a
/// partially written value.
#[async_trait]
pub trait SignatureStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>>;
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;
    async fn remove_item(&self, key: &str) -> Result<()>;
}

/// Storage that remembers nothing; every lookup is a miss.
#[derive(Debug, Default)]
pub struct NoopStorage;

#[async_trait]
impl SignatureStorage for NoopStorage {
    async fn get_item(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    async fn remove_item(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    items: RwLock<HashMap<String, String>>,
}

impl InMemoryStorage {
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl SignatureStorage for InMemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let guard = self.items.read().await;
        Ok(guard.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self.items.write().await;
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let mut guard = self.items.write().await;
        guard.remove(key);
        Ok(())
    }
}

/// Persistent keyed store. All keys live under a single namespace prefix so
/// the database can be shared with other data.
pub struct RocksDbStorage {
    db: Arc<DB>,
}

impl RocksDbStorage {
    pub fn open_default(path: &str) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, path).with_context(|| format!("failed to open RocksDB at {path}"))?;
        Ok(Self { db: Arc::new(db) })
    }

    fn namespaced(key: &str) -> String {
        format!("kv:{key}")
    }
}

#[async_trait]
impl SignatureStorage for RocksDbStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let value = self.db.get(Self::namespaced(key).as_bytes())?;
        match value {
            Some(raw) => Ok(Some(
                String::from_utf8(raw).with_context(|| format!("stored value for {key} is not UTF-8"))?,
            )),
            None => Ok(None),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.db.put(Self::namespaced(key).as_bytes(), value.as_bytes())?;
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.db.delete(Self::namespaced(key).as_bytes())?;
        Ok(())
    }
}
