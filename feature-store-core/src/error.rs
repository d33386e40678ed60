use crate::model::EntityId;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = FeatureStoreError> = std::result::Result<T, E>;

/// Failure surfaced by [`crate::FeatureStore`] operations.
///
/// A missing entity is not an error: reads return `None` instead.
#[derive(Debug, Error)]
pub enum FeatureStoreError {
    /// The online store could not be reached or the round trip failed.
    #[error("online store unavailable during {operation}: {source}")]
    StoreUnavailable {
        operation: &'static str,
        #[source]
        source: BoxError,
    },
    /// A pipelined write failed. Any subset of `entity_ids` may have been applied.
    #[error(
        "{operation} failed, writes for {} entities may be partially applied: {source}",
        .entity_ids.len()
    )]
    PartialBatch {
        operation: &'static str,
        entity_ids: Vec<EntityId>,
        #[source]
        source: BoxError,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FeatureStoreError {
    pub(crate) fn unavailable(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::StoreUnavailable {
            operation,
            source: source.into(),
        }
    }

    pub(crate) fn partial_batch(
        operation: &'static str,
        entity_ids: Vec<EntityId>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::PartialBatch {
            operation,
            entity_ids,
            source: source.into(),
        }
    }

    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// True for failures caused by the online store rather than by the caller.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::PartialBatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn unavailable_keeps_cause() {
        let err = FeatureStoreError::unavailable("get_features", anyhow::anyhow!("connection reset"));
        assert!(err.is_unavailable());
        assert_eq!(
            err.to_string(),
            "online store unavailable during get_features: connection reset"
        );
        assert_eq!(err.source().map(|e| e.to_string()).as_deref(), Some("connection reset"));
    }

    #[test]
    fn partial_batch_reports_entity_count() {
        let err = FeatureStoreError::partial_batch(
            "store_batch_features",
            vec![EntityId::from(1), EntityId::from(2)],
            anyhow::anyhow!("broken pipe"),
        );
        assert!(err.is_unavailable());
        assert_eq!(
            err.to_string(),
            "store_batch_features failed, writes for 2 entities may be partially applied: broken pipe"
        );
    }

    #[test]
    fn invalid_request_is_not_unavailable() {
        let err = FeatureStoreError::invalid_request("empty feature mapping");
        assert!(!err.is_unavailable());
        assert_eq!(err.to_string(), "invalid request: empty feature mapping");
    }
}
