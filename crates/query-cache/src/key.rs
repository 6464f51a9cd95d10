//! Cache key derivation
//!
//! A key is the query name followed by the base64 encoding of the canonical
//! JSON form of the parameters. Object fields are sorted recursively, so two
//! parameter sets that differ only in field order produce the same key.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use query_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Write};

const SEPARATOR: char = ':';

/// Key for cache lookups, derived from a query name and its parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Create a cache key from a query name and serializable parameters
    pub fn new<P: Serialize + ?Sized>(query_name: &str, params: &P) -> Result<Self> {
        let value = serde_json::to_value(params)?;
        Ok(Self::from_value(query_name, &value))
    }

    /// Create a cache key from already-serialized parameters
    pub fn from_value(query_name: &str, params: &Value) -> Self {
        let mut json = String::new();
        write_canonical(params, &mut json);
        let mut key = String::with_capacity(query_name.len() + 1 + json.len() * 4 / 3 + 4);
        key.push_str(query_name);
        key.push(SEPARATOR);
        URL_SAFE_NO_PAD.encode_string(json.as_bytes(), &mut key);
        Self(key)
    }

    /// The query name this key was derived from
    pub fn query_name(&self) -> &str {
        // The encoded suffix never contains the separator, so the last one
        // delimits the name even if the name itself contains separators.
        self.0
            .rsplit_once(SEPARATOR)
            .map(|(name, _)| name)
            .unwrap_or(&self.0)
    }

    /// Prefix shared by every key of `query_name`
    pub fn prefix_for(query_name: &str) -> String {
        format!("{}{}", query_name, SEPARATOR)
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Write `value` as compact JSON with every object's fields in sorted order.
///
/// `serde_json::Map` keeps insertion order when any crate in the build turns
/// on `preserve_order`, so fields are sorted here instead of relying on it.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_unstable_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (name, field)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(name, out);
                out.push(':');
                write_canonical(field, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(text) => write_json_string(text, out),
        scalar => {
            let _ = write!(out, "{}", scalar);
        }
    }
}

fn write_json_string(text: &str, out: &mut String) {
    // Serializing a string cannot fail.
    if let Ok(quoted) = serde_json::to_string(text) {
        out.push_str(&quoted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_same_params_same_key() {
        let key1 = CacheKey::new("courses", &json!({"status": "active"})).unwrap();
        let key2 = CacheKey::new("courses", &json!({"status": "active"})).unwrap();
        let key3 = CacheKey::new("courses", &json!({"status": "archived"})).unwrap();

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let mut a = HashMap::new();
        let mut b = HashMap::new();
        for i in 0..32 {
            a.insert(format!("field{}", i), i);
        }
        for i in (0..32).rev() {
            b.insert(format!("field{}", i), i);
        }

        assert_eq!(
            CacheKey::new("q", &a).unwrap(),
            CacheKey::new("q", &b).unwrap()
        );
    }

    #[test]
    fn test_nested_objects_are_canonical() {
        let a = json!({"filter": {"b": 1, "a": [{"y": 2, "x": 1}]}, "page": 1});
        let b = json!({"page": 1, "filter": {"a": [{"x": 1, "y": 2}], "b": 1}});
        assert_eq!(CacheKey::from_value("q", &a), CacheKey::from_value("q", &b));
    }

    #[test]
    fn test_array_order_matters() {
        let a = CacheKey::new("q", &json!(["id1", "id2"])).unwrap();
        let b = CacheKey::new("q", &json!(["id2", "id1"])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_is_prefixed_by_query_name() {
        let key = CacheKey::new("courses", &json!({"status": "active"})).unwrap();
        assert!(key.as_str().starts_with(&CacheKey::prefix_for("courses")));
        assert_eq!(key.query_name(), "courses");

        let nested = CacheKey::new("course:stats", &json!({})).unwrap();
        assert_eq!(nested.query_name(), "course:stats");
    }

    #[test]
    fn test_param_text_is_encoded() {
        let key = CacheKey::new("users", &json!({"tag": "courses"})).unwrap();
        assert!(!key.as_str().contains("courses"));
    }

    #[test]
    fn test_encoded_params_are_sorted_compact_json() {
        let key = CacheKey::new(
            "q",
            &json!({"b": 1.5, "a": {"d": [1, "x\"y", true], "c": null}}),
        )
        .unwrap();
        let (_, encoded) = key.as_str().split_once(':').unwrap();
        let decoded = URL_SAFE_NO_PAD.decode(encoded).unwrap();

        assert_eq!(
            String::from_utf8(decoded).unwrap(),
            r#"{"a":{"c":null,"d":[1,"x\"y",true]},"b":1.5}"#
        );
    }
}
