//! In-process online store with Redis hash semantics, for tests and local serving.

use crate::model::StoredFeatures;
use crate::onlinestore::{OnlineStore, ScanPage, WriteBatch, WriteCommand};
use crate::util::redis_match_pattern;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tokio::time::{Duration, Instant};

struct Record {
    slot: u64,
    fields: StoredFeatures,
    expires_at: Option<Instant>,
}

impl Record {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Records plus a slot index that gives every live key a stable scan position.
/// A scan cursor is the next slot to visit; slot numbers start at 1 so that `0`
/// can mean both "start" and "done".
#[derive(Default)]
struct Keyspace {
    records: HashMap<String, Record>,
    slots: BTreeMap<u64, String>,
    last_slot: u64,
}

impl Keyspace {
    fn remove(&mut self, key: &str) {
        if let Some(record) = self.records.remove(key) {
            self.slots.remove(&record.slot);
        }
    }

    fn remove_if_expired(&mut self, key: &str, now: Instant) {
        if self.records.get(key).is_some_and(|r| r.is_expired(now)) {
            self.remove(key);
        }
    }

    fn live(&self, key: &str, now: Instant) -> Option<&Record> {
        self.records.get(key).filter(|r| !r.is_expired(now))
    }

    fn merge_fields(&mut self, key: &str, fields: &[(String, String)], now: Instant) -> Result<()> {
        if fields.is_empty() {
            return Err(anyhow!("wrong number of arguments for 'hset' command"));
        }
        self.remove_if_expired(key, now);
        if !self.records.contains_key(key) {
            self.last_slot += 1;
            self.slots.insert(self.last_slot, key.to_string());
            self.records.insert(
                key.to_string(),
                Record {
                    slot: self.last_slot,
                    fields: StoredFeatures::new(),
                    expires_at: None,
                },
            );
        }
        if let Some(record) = self.records.get_mut(key) {
            record.fields.extend(fields.iter().cloned());
        }
        Ok(())
    }

    fn expire(&mut self, key: &str, ttl_seconds: i64, now: Instant) {
        self.remove_if_expired(key, now);
        if ttl_seconds <= 0 {
            self.remove(key);
            return;
        }
        if let Some(record) = self.records.get_mut(key) {
            // a deadline past the clock's range never arrives
            record.expires_at = now.checked_add(Duration::from_secs(ttl_seconds as u64));
        }
    }
}

/// Hash store kept in process memory.
///
/// Field writes merge, expirations are lazy, and `scan_page` walks keys in
/// slot order so every key that lives through a whole scan is returned.
/// Clones share the same keyspace.
#[derive(Clone, Default)]
pub struct InMemoryOnlineStore {
    keyspace: Arc<RwLock<Keyspace>>,
}

impl InMemoryOnlineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes a key outright, like an external `DEL`.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let mut keyspace = self
            .keyspace
            .write()
            .map_err(|_| anyhow!("in-memory online store lock poisoned"))?;
        let existed = keyspace.live(key, Instant::now()).is_some();
        keyspace.remove(key);
        Ok(existed)
    }

    /// Number of live keys.
    pub fn len(&self) -> Result<usize> {
        let keyspace = self
            .keyspace
            .read()
            .map_err(|_| anyhow!("in-memory online store lock poisoned"))?;
        let now = Instant::now();
        Ok(keyspace
            .records
            .values()
            .filter(|r| !r.is_expired(now))
            .count())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl OnlineStore for InMemoryOnlineStore {
    async fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let mut keyspace = self
            .keyspace
            .write()
            .map_err(|_| anyhow!("in-memory online store lock poisoned"))?;
        let now = Instant::now();
        // Like a Redis pipeline: commands before a failing one stay applied.
        for command in batch.commands() {
            match command {
                WriteCommand::MergeFields { key, fields } => {
                    keyspace.merge_fields(key, fields, now)?
                }
                WriteCommand::Expire { key, ttl_seconds } => {
                    keyspace.expire(key, *ttl_seconds, now)
                }
            }
        }
        Ok(())
    }

    async fn read_batch(&self, keys: &[String]) -> Result<Vec<StoredFeatures>> {
        let keyspace = self
            .keyspace
            .read()
            .map_err(|_| anyhow!("in-memory online store lock poisoned"))?;
        let now = Instant::now();
        Ok(keys
            .iter()
            .map(|key| {
                keyspace
                    .live(key, now)
                    .map(|r| r.fields.clone())
                    .unwrap_or_default()
            })
            .collect())
    }

    async fn scan_page(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let pattern = redis_match_pattern(pattern)?;
        let mut keyspace = self
            .keyspace
            .write()
            .map_err(|_| anyhow!("in-memory online store lock poisoned"))?;
        let now = Instant::now();
        let visited: Vec<(u64, String)> = keyspace
            .slots
            .range(cursor..)
            .take(count.max(1))
            .map(|(slot, key)| (*slot, key.clone()))
            .collect();
        let next_cursor = match visited.last() {
            Some((last, _)) if keyspace.slots.range(last + 1..).next().is_some() => last + 1,
            _ => 0,
        };
        let mut keys = Vec::new();
        for (_, key) in visited {
            if keyspace.live(&key, now).is_none() {
                keyspace.remove(&key);
            } else if pattern.matches(&key) {
                keys.push(key);
            }
        }
        Ok(ScanPage {
            cursor: next_cursor,
            keys,
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
