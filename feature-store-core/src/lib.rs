pub mod config;
pub mod error;
pub mod feature_store;
pub mod model;
pub mod onlinestore;
mod util;

pub use error::{FeatureStoreError, Result};
pub use feature_store::FeatureStore;
pub use model::{EntityId, FeatureMap, FeatureValue, StoredFeatures};
