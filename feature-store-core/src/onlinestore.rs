pub mod in_memory;
pub mod redis;

use crate::config::OnlineStoreConfig;
use crate::model::StoredFeatures;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub use self::in_memory::InMemoryOnlineStore;
pub use self::redis::RedisOnlineStore;

/// One write sent to the online store.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteCommand {
    /// `HSET key f1 v1 ...`: upsert the given fields, leave the others untouched.
    MergeFields {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// `EXPIRE key ttl_seconds`
    Expire { key: String, ttl_seconds: i64 },
}

/// Ordered writes shipped to the store in a single round trip.
///
/// Batched, not atomic: there is no transaction around the commands and a
/// failure may leave any prefix or subset of them applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    commands: Vec<WriteCommand>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge_fields(&mut self, key: String, fields: Vec<(String, String)>) -> &mut Self {
        self.commands.push(WriteCommand::MergeFields { key, fields });
        self
    }

    pub fn expire(&mut self, key: String, ttl_seconds: i64) -> &mut Self {
        self.commands.push(WriteCommand::Expire { key, ttl_seconds });
        self
    }

    pub fn commands(&self) -> &[WriteCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// One page of a cursor based keyspace scan. A `cursor` of `0` means the scan is complete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// Key/value backend the feature store talks to. Keys are full storage keys.
#[async_trait]
pub trait OnlineStore: Send + Sync + 'static {
    /// Applies the batch in order within one round trip.
    async fn write_batch(&self, batch: WriteBatch) -> Result<()>;

    /// Reads every field of each hash, in key order, within one round trip.
    /// Absent keys produce an empty mapping.
    async fn read_batch(&self, keys: &[String]) -> Result<Vec<StoredFeatures>>;

    /// Fetches the scan page starting at `cursor` (`0` starts a new scan).
    async fn scan_page(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage>;

    async fn ping(&self) -> Result<()>;
}

pub async fn get_online_store(config: &OnlineStoreConfig) -> Result<Arc<dyn OnlineStore>> {
    match config {
        OnlineStoreConfig::Redis(redis_config) => {
            debug!(
                "Create Redis online store at {}:{}/{}",
                redis_config.host, redis_config.port, redis_config.db
            );
            RedisOnlineStore::connect(redis_config)
                .await
                .map(|redis| Arc::new(redis) as Arc<dyn OnlineStore>)
        }
        OnlineStoreConfig::InMemory => {
            debug!("Create in-memory online store");
            Ok(Arc::new(InMemoryOnlineStore::new()) as Arc<dyn OnlineStore>)
        }
    }
}
