use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A scalar metadata value. The core never carries free-form nested JSON;
/// anything structured must be flattened by the caller before it crosses
/// the API boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Boolean(bool),
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Integer(i)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Boolean(b)
    }
}

/// Flat string-to-scalar metadata attached to transactions and transfers.
/// Opaque to the ledger; payout details and provider references live here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Converts to the JSON value stored in the metadata column.
    pub fn into_value(self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Parses a stored column value, rejecting non-scalar entries.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_column_value() {
        let meta = Metadata::new()
            .insert("payout_iban", "DE02120300000000202051")
            .insert("attempt", 2i64)
            .insert("sandbox", true);

        let value = meta.clone().into_value();
        let parsed = Metadata::from_value(value).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_nested_json_is_rejected() {
        let value = serde_json::json!({"outer": {"inner": 1}});
        assert!(Metadata::from_value(value).is_none());
    }

    #[test]
    fn test_get_after_insert() {
        let meta = Metadata::new().insert("method", "card");
        assert_eq!(meta.get("method"), Some(&MetadataValue::String("card".to_string())));
        assert!(meta.get("missing").is_none());
    }
}
