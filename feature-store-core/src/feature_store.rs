//! Feature Store module. Entity-keyed feature reads, writes and enumeration over an online store.

mod entity_scan;
mod feature_store_impl;

pub use entity_scan::EntityIdStream;
pub use feature_store_impl::{BatchWriteReport, FeatureStore};
