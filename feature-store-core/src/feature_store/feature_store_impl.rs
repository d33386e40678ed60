use crate::config::{DEFAULT_SCAN_COUNT, StoreConfig};
use crate::error::{FeatureStoreError, Result};
use crate::feature_store::entity_scan::{EntityIdStream, scan_entity_ids};
use crate::model::{EntityId, FeatureMap, StoredFeatures, to_storage_fields};
use crate::onlinestore::{OnlineStore, WriteBatch, get_online_store};
use futures::TryStreamExt;
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Entities written by a successful `store_batch_features`, in command order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchWriteReport {
    pub entity_ids: Vec<EntityId>,
}

impl BatchWriteReport {
    pub fn len(&self) -> usize {
        self.entity_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty()
    }
}

/// Client facade over an [`OnlineStore`]. Holds no state besides the store handle;
/// every operation is a single round trip.
#[derive(Clone)]
pub struct FeatureStore {
    online_store: Arc<dyn OnlineStore>,
    scan_count: usize,
}

impl FeatureStore {
    pub fn new(online_store: Arc<dyn OnlineStore>) -> Self {
        Self {
            online_store,
            scan_count: DEFAULT_SCAN_COUNT,
        }
    }

    /// Sets the `COUNT` hint used for every `SCAN` page.
    pub fn with_scan_count(mut self, scan_count: usize) -> Self {
        self.scan_count = scan_count.max(1);
        self
    }

    pub async fn from_config(config: &StoreConfig) -> anyhow::Result<Self> {
        let online_store = get_online_store(&config.online_store).await?;
        Ok(Self::new(online_store).with_scan_count(config.scan_count))
    }

    /// Upserts `features` into the entity's record, creating it if absent.
    /// Fields not present in `features` keep their stored values.
    pub async fn store_features(
        &self,
        entity_id: impl Into<EntityId>,
        features: &FeatureMap,
    ) -> Result<()> {
        let entity_id = entity_id.into();
        check_not_empty(&entity_id, features)?;
        let mut batch = WriteBatch::new();
        batch.merge_fields(entity_id.feature_key(), to_storage_fields(features));
        debug!(
            "Store {} features for entity {}",
            features.len(),
            entity_id
        );
        self.online_store.write_batch(batch).await.map_err(|err| {
            warn!("Failed to store features for entity {}: {:#}", entity_id, err);
            FeatureStoreError::unavailable("store_features", err)
        })
    }

    /// Current features of the entity, or `None` when it has no record.
    pub async fn get_features(
        &self,
        entity_id: impl Into<EntityId>,
    ) -> Result<Option<StoredFeatures>> {
        let entity_id = entity_id.into();
        debug!("Get features for entity {}", entity_id);
        let mut rows = self
            .online_store
            .read_batch(&[entity_id.feature_key()])
            .await
            .map_err(|err| FeatureStoreError::unavailable("get_features", err))?;
        Ok(rows.pop().filter(|features| !features.is_empty()))
    }

    /// Upserts every entity's features in one pipelined round trip.
    ///
    /// Batched, not atomic: on failure any subset of the entities may have been
    /// written, reported through [`FeatureStoreError::PartialBatch`].
    pub async fn store_batch_features<I, K, V>(&self, batch: I) -> Result<BatchWriteReport>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<EntityId>,
        V: Borrow<FeatureMap>,
    {
        let mut write_batch = WriteBatch::new();
        let mut entity_ids = vec![];
        for (entity_id, features) in batch {
            let entity_id = entity_id.into();
            let features = features.borrow();
            check_not_empty(&entity_id, features)?;
            write_batch.merge_fields(entity_id.feature_key(), to_storage_fields(features));
            entity_ids.push(entity_id);
        }
        if entity_ids.is_empty() {
            return Ok(BatchWriteReport::default());
        }
        debug!("Store features for {} entities in one pipeline", entity_ids.len());
        match self.online_store.write_batch(write_batch).await {
            Ok(()) => Ok(BatchWriteReport { entity_ids }),
            Err(err) => {
                warn!(
                    "Batch write of {} entities failed, it may be partially applied: {:#}",
                    entity_ids.len(),
                    err
                );
                Err(FeatureStoreError::partial_batch(
                    "store_batch_features",
                    entity_ids,
                    err,
                ))
            }
        }
    }

    /// Reads each entity's features in one pipelined round trip.
    /// Every distinct requested id is present in the result, `None` when absent.
    pub async fn get_batch_features<I>(
        &self,
        entity_ids: I,
    ) -> Result<HashMap<EntityId, Option<StoredFeatures>>>
    where
        I: IntoIterator,
        I::Item: Into<EntityId>,
    {
        let entity_ids: Vec<EntityId> = entity_ids.into_iter().map(Into::into).collect();
        if entity_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<String> = entity_ids.iter().map(EntityId::feature_key).collect();
        debug!("Get features for {} entities in one pipeline", keys.len());
        let rows = self
            .online_store
            .read_batch(&keys)
            .await
            .map_err(|err| FeatureStoreError::unavailable("get_batch_features", err))?;
        Ok(entity_ids
            .into_iter()
            .zip(rows)
            .map(|(entity_id, features)| {
                (entity_id, Some(features).filter(|f| !f.is_empty()))
            })
            .collect())
    }

    /// Lazily enumerates every entity with a feature record, using a cursor scan.
    ///
    /// Ids present for the whole scan are yielded at least once; ids may repeat.
    /// Dropping the stream abandons the scan, and each call starts a new one.
    pub fn get_all_entity_ids(&self) -> EntityIdStream {
        scan_entity_ids(self.online_store.clone(), self.scan_count)
    }

    /// Drains [`FeatureStore::get_all_entity_ids`] and drops repeated ids, keeping first-seen order.
    pub async fn collect_entity_ids(&self) -> Result<Vec<EntityId>> {
        let mut seen = HashSet::new();
        self.get_all_entity_ids()
            .try_filter(|entity_id| futures::future::ready(seen.insert(entity_id.clone())))
            .try_collect()
            .await
    }

    /// Upserts `features` and sets the record to expire after `ttl_seconds`,
    /// both in one pipelined round trip.
    ///
    /// The two commands are not a transaction: a failure can leave the
    /// features written without an expiry.
    pub async fn store_features_with_ttl(
        &self,
        entity_id: impl Into<EntityId>,
        features: &FeatureMap,
        ttl_seconds: u64,
    ) -> Result<()> {
        let entity_id = entity_id.into();
        check_not_empty(&entity_id, features)?;
        let ttl_seconds = i64::try_from(ttl_seconds)
            .ok()
            .filter(|ttl| *ttl > 0)
            .ok_or_else(|| {
                FeatureStoreError::invalid_request(format!(
                    "ttl_seconds must be between 1 and {}, got {}",
                    i64::MAX,
                    ttl_seconds
                ))
            })?;
        let key = entity_id.feature_key();
        let mut batch = WriteBatch::new();
        batch
            .merge_fields(key.clone(), to_storage_fields(features))
            .expire(key, ttl_seconds);
        debug!(
            "Store {} features for entity {} with ttl {}s",
            features.len(),
            entity_id,
            ttl_seconds
        );
        self.online_store.write_batch(batch).await.map_err(|err| {
            warn!(
                "Failed to store features with ttl for entity {}, expiry may be missing: {:#}",
                entity_id, err
            );
            FeatureStoreError::partial_batch("store_features_with_ttl", vec![entity_id], err)
        })
    }

    pub async fn health_check(&self) -> Result<()> {
        self.online_store
            .ping()
            .await
            .map_err(|err| FeatureStoreError::unavailable("health_check", err))
    }
}

fn check_not_empty(entity_id: &EntityId, features: &FeatureMap) -> Result<()> {
    if features.is_empty() {
        return Err(FeatureStoreError::invalid_request(format!(
            "feature mapping for entity {} is empty",
            entity_id
        )));
    }
    Ok(())
}
