//! Stable content hashing over canonicalised structured values.
//!
//! The orchestrator derives every identifier (task id, checkout id,
//! environment id) from a hash of a JSON-like value: mapping keys sorted
//! ascending, lists sorted by a well-defined key function, no insignificant
//! whitespace. Two structurally equivalent values always produce the same
//! digest, independent of the order their fields were constructed in.

use serde::Serialize;
use serde_json::Value;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Failure modes for hashing a value.
#[derive(Debug, Error)]
pub enum Error {
    /// The input could not be converted to a `serde_json::Value`.
    #[error("failed to encode value for hashing: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Recursively canonicalise a JSON value.
///
/// Mapping keys come out sorted ascending (`serde_json::Map`'s default
/// backing is a `BTreeMap`, so this falls out of rebuilding the map).
/// Lists are sorted by reducing each element to a comparison key: a
/// mapping reduces to its sorted key set, a sequence is its own key, and
/// anything else is a one-element key.
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut canon: Vec<Value> = items.iter().map(canonicalize).collect();
            canon.sort_by(|a, b| sort_key_repr(a).cmp(&sort_key_repr(b)));
            Value::Array(canon)
        }
        other => other.clone(),
    }
}

/// The sort key used to order list elements, per §4.1's reduction rule.
fn sort_key(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Array(map.keys().cloned().map(Value::String).collect()),
        Value::Array(_) => value.clone(),
        other => Value::Array(vec![other.clone()]),
    }
}

/// A totally-ordered string representation of a sort key, for comparison.
fn sort_key_repr(value: &Value) -> String {
    serde_json::to_string(&sort_key(value)).unwrap_or_default()
}

/// Hex-encoded SHA-1 digest of the canonical, compact JSON rendering of `value`.
#[must_use]
pub fn hash_value(value: &Value) -> String {
    let canon = canonicalize(value);
    // `to_string` on a freshly rebuilt Map/Vec carries no insignificant
    // whitespace and reflects the canonical ordering established above.
    let bytes = serde_json::to_vec(&canon).unwrap_or_default();
    let digest = Sha1::digest(&bytes);
    hex::encode(digest)
}

/// Hash any serialisable value after canonicalisation.
pub fn hash_canon<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_value(value)?;
    Ok(hash_value(&json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn digest_is_40_hex_chars() {
        let digest = hash_value(&json!({"a": 1}));
        assert_eq!(digest.len(), 40);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"repository": "r", "commit": "c", "args": {"epochs": 3, "lr": 0.1}});
        let b = json!({"commit": "c", "args": {"lr": 0.1, "epochs": 3}, "repository": "r"});
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn list_order_of_maps_does_not_matter() {
        let a = json!({"deps": [{"id": "x", "resources": ["a", "b"]}, {"id": "y", "resources": []}]});
        let b = json!({"deps": [{"id": "y", "resources": []}, {"id": "x", "resources": ["a", "b"]}]});
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn distinct_values_hash_differently() {
        assert_ne!(hash_value(&json!({"a": 1})), hash_value(&json!({"a": 2})));
    }

    #[test]
    fn scalar_list_elements_sort_deterministically() {
        let a = json!(["b", "a", "c"]);
        let b = json!(["c", "b", "a"]);
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    proptest::proptest! {
        #[test]
        fn canonicalize_is_idempotent(s in "[a-z]{1,8}", n in 0i64..1000) {
            let v = json!({s.clone(): n});
            let once = canonicalize(&v);
            let twice = canonicalize(&once);
            prop_assert_eq!(once, twice);
        }
    }
}
