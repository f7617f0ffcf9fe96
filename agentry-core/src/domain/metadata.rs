//! Job metadata values
//!
//! Metadata is a flat map that ends up in the agent's environment, so every
//! value needs a plain string form. Scalars are expected; anything else is
//! still accepted and rendered as JSON text.

use serde::{Deserialize, Serialize};

/// A metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Null,
    /// Arrays and objects
    Structured(serde_json::Value),
}

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Integer(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Text(s) => f.write_str(s),
            MetadataValue::Null => f.write_str("null"),
            MetadataValue::Structured(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Integer(i)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_deserializes_each_scalar_kind() {
        let map: BTreeMap<String, MetadataValue> = serde_json::from_value(serde_json::json!({
            "flag": true,
            "count": 3,
            "ratio": 1.5,
            "name": "acme"
        }))
        .unwrap();

        assert_eq!(map["flag"], MetadataValue::Bool(true));
        assert_eq!(map["count"], MetadataValue::Integer(3));
        assert_eq!(map["ratio"], MetadataValue::Float(1.5));
        assert_eq!(map["name"], MetadataValue::Text("acme".to_string()));
    }

    #[test]
    fn test_display_matches_env_form() {
        assert_eq!(MetadataValue::Integer(1).to_string(), "1");
        assert_eq!(MetadataValue::Float(2.0).to_string(), "2");
        assert_eq!(MetadataValue::Float(0.25).to_string(), "0.25");
        assert_eq!(MetadataValue::Bool(false).to_string(), "false");
        assert_eq!(MetadataValue::from("http://x").to_string(), "http://x");
    }

    #[test]
    fn test_null_and_nested_values_are_kept() {
        let map: BTreeMap<String, MetadataValue> = serde_json::from_value(serde_json::json!({
            "ticketId": null,
            "labels": ["bug", "p1"],
            "nested": { "a": 1 }
        }))
        .unwrap();

        assert_eq!(map["ticketId"], MetadataValue::Null);
        assert_eq!(map["ticketId"].to_string(), "null");
        assert_eq!(map["labels"].to_string(), r#"["bug","p1"]"#);
        assert_eq!(map["nested"].to_string(), r#"{"a":1}"#);
    }
}
