//! Persistent key-value state shared by all chain adapters.
//!
//! Adapters only touch keys scoped to their own chain id, so the store needs
//! no cross-adapter coordination beyond its own internal locking.

use async_trait::async_trait;
use rocksdb::{Options, WriteOptions, DB};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use crate::{types::ChainId, Error};

#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Returns `None` when the key has never been written.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), Error>;

    /// Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), Error>;
}

/// RocksDB database at the configured block store path.
pub struct RocksDbStore {
    db: Arc<DB>,
    sync_writes: bool,
}

impl RocksDbStore {
    /// Opens the database, creating it if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let db = DB::open(&opts, path).map_err(|e| {
            Error::Storage(format!("Failed to open store at {}: {}", path.display(), e))
        })?;
        Ok(Self { db: Arc::new(db), sync_writes: true })
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }

    /// Runs a blocking database call off the async workers.
    async fn blocking<T, F>(&self, op: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&DB) -> Result<T, rocksdb::Error> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| Error::Storage(format!("Store task failed: {}", e)))?
            .map_err(|e| Error::Storage(format!("RocksDB operation failed: {}", e)))
    }
}

#[async_trait]
impl PersistentStore for RocksDbStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let key = key.to_string();
        self.blocking(move |db| db.get(key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        let key = key.to_string();
        let opts = self.write_options();
        self.blocking(move |db| db.put_opt(key, value, &opts)).await
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let key = key.to_string();
        let opts = self.write_options();
        self.blocking(move |db| db.delete_opt(key, &opts)).await
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Tracks the next block each chain should poll, so a restarted relayer
/// resumes where it stopped.
#[derive(Clone)]
pub struct BlockStore {
    store: Arc<dyn PersistentStore>,
}

impl BlockStore {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    fn key(chain_id: ChainId) -> String {
        format!("chain:{}:block", chain_id)
    }

    pub async fn next_block(&self, chain_id: ChainId) -> Result<Option<u64>, Error> {
        match self.store.get(&Self::key(chain_id)).await? {
            Some(raw) => {
                let bytes: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
                    Error::Storage(format!("Corrupt block record for chain {}", chain_id))
                })?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    pub async fn store_next_block(&self, chain_id: ChainId, block: u64) -> Result<(), Error> {
        self.store
            .set(&Self::key(chain_id), block.to_be_bytes().to_vec())
            .await
    }

    pub async fn clear(&self, chain_id: ChainId) -> Result<(), Error> {
        self.store.delete(&Self::key(chain_id)).await
    }
}
