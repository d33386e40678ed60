use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Formatter;

const KEY_PREFIX: &str = "entity:";
const KEY_SUFFIX: &str = ":features";

/// Glob matching every feature record and nothing else in the keyspace.
pub const FEATURE_KEY_PATTERN: &str = "entity:*:features";

/// Feature mapping supplied by producers.
pub type FeatureMap = HashMap<String, FeatureValue>;

/// Feature mapping as stored. Values come back as strings; parsing is up to the caller.
pub type StoredFeatures = HashMap<String, String>;

/// Identity of the subject a feature mapping describes.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "EntityIdDef", into = "String")]
pub struct EntityId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum EntityIdDef {
    String(String),
    Int(i64),
}

impl From<EntityIdDef> for EntityId {
    fn from(value: EntityIdDef) -> Self {
        match value {
            EntityIdDef::String(s) => EntityId(s),
            EntityIdDef::Int(i) => EntityId(i.to_string()),
        }
    }
}

impl From<EntityId> for String {
    fn from(value: EntityId) -> Self {
        value.0
    }
}

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage key of this entity's feature record: `entity:<id>:features`.
    pub fn feature_key(&self) -> String {
        [KEY_PREFIX, self.0.as_str(), KEY_SUFFIX].concat()
    }

    /// Inverse of [`EntityId::feature_key`]. Returns `None` for keys outside the namespace.
    pub fn from_feature_key(key: &str) -> Option<Self> {
        key.strip_prefix(KEY_PREFIX)
            .and_then(|rest| rest.strip_suffix(KEY_SUFFIX))
            .map(|id| Self(id.to_string()))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&String> for EntityId {
    fn from(value: &String) -> Self {
        Self(value.clone())
    }
}

impl From<&EntityId> for EntityId {
    fn from(value: &EntityId) -> Self {
        value.clone()
    }
}

macro_rules! entity_id_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for EntityId {
                fn from(value: $t) -> Self {
                    Self(value.to_string())
                }
            }
        )*
    };
}

entity_id_from_int!(i32, i64, u32, u64);

/// A single feature value. Always persisted as its string form, see [`FeatureValue::to_storage_string`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl FeatureValue {
    /// String written to the store for this value.
    ///
    /// Integral floats keep a trailing `.0` so they stay distinguishable from integers.
    pub fn to_storage_string(&self) -> String {
        match self {
            FeatureValue::String(s) => s.clone(),
            FeatureValue::Int(i) => i.to_string(),
            FeatureValue::Bool(b) => b.to_string(),
            FeatureValue::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 {
                    format!("{:.1}", f)
                } else {
                    f.to_string()
                }
            }
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_storage_string())
    }
}

impl From<String> for FeatureValue {
    fn from(value: String) -> Self {
        FeatureValue::String(value)
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        FeatureValue::String(value.to_string())
    }
}

impl From<i64> for FeatureValue {
    fn from(value: i64) -> Self {
        FeatureValue::Int(value)
    }
}

impl From<i32> for FeatureValue {
    fn from(value: i32) -> Self {
        FeatureValue::Int(i64::from(value))
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        FeatureValue::Float(value)
    }
}

impl From<f32> for FeatureValue {
    fn from(value: f32) -> Self {
        FeatureValue::Float(f64::from(value))
    }
}

impl From<bool> for FeatureValue {
    fn from(value: bool) -> Self {
        FeatureValue::Bool(value)
    }
}

/// Builds a [`FeatureMap`] from `(name, value)` pairs.
pub fn feature_map<K, V, I>(pairs: I) -> FeatureMap
where
    K: Into<String>,
    V: Into<FeatureValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Field/value pairs in the form written to the store.
pub(crate) fn to_storage_fields(features: &FeatureMap) -> Vec<(String, String)> {
    features
        .iter()
        .map(|(name, value)| (name.clone(), value.to_storage_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_key_round_trip() {
        let id = EntityId::from(332);
        assert_eq!(id.feature_key(), "entity:332:features");
        assert_eq!(EntityId::from_feature_key("entity:332:features"), Some(id));
    }

    #[test]
    fn feature_key_keeps_colons_in_id() {
        let id = EntityId::from("tenant:7:passenger");
        let key = id.feature_key();
        assert_eq!(key, "entity:tenant:7:passenger:features");
        assert_eq!(EntityId::from_feature_key(&key), Some(id));
    }

    #[test]
    fn foreign_keys_are_rejected() {
        assert_eq!(EntityId::from_feature_key("session:1"), None);
        assert_eq!(EntityId::from_feature_key("entity:1:labels"), None);
    }

    #[test]
    fn storage_strings() {
        assert_eq!(FeatureValue::from("male").to_storage_string(), "male");
        assert_eq!(FeatureValue::from(3).to_storage_string(), "3");
        assert_eq!(FeatureValue::from(-12_i64).to_storage_string(), "-12");
        assert_eq!(FeatureValue::from(true).to_storage_string(), "true");
        assert_eq!(FeatureValue::from(1.0).to_storage_string(), "1.0");
        assert_eq!(FeatureValue::from(7.25).to_storage_string(), "7.25");
        assert_eq!(
            FeatureValue::from(1e16).to_storage_string(),
            "10000000000000000.0"
        );
        assert_eq!(FeatureValue::from(-0.0).to_storage_string(), "-0.0");
        assert_eq!(FeatureValue::from(f64::NAN).to_storage_string(), "NaN");
    }

    #[test]
    fn values_deserialize_untagged() -> anyhow::Result<()> {
        let features: FeatureMap = serde_json::from_str(
            r#"{"age": 22, "fare": 7.25, "sex": "male", "alone": false}"#,
        )?;
        assert_eq!(features["age"], FeatureValue::Int(22));
        assert_eq!(features["fare"], FeatureValue::Float(7.25));
        assert_eq!(features["sex"], FeatureValue::String("male".to_string()));
        assert_eq!(features["alone"], FeatureValue::Bool(false));
        Ok(())
    }

    #[test]
    fn entity_id_deserializes_from_string_or_number() -> anyhow::Result<()> {
        let ids: Vec<EntityId> = serde_json::from_str(r#"[332, "abc"]"#)?;
        assert_eq!(ids, vec![EntityId::from(332), EntityId::from("abc")]);
        assert_eq!(serde_json::to_string(&ids)?, r#"["332","abc"]"#);
        Ok(())
    }
}
