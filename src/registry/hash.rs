//! Deterministic content hashing for token records. The hex digest doubles
//! as the ETag on token responses and as the optimistic-concurrency version.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::record::{is_token_data_key, TokenRecord};
use super::RegistryError;

/// Hash of the sanitized token payload. A pure function of the record: equal
/// payloads hash equally regardless of input key order (`serde_json` maps
/// iterate sorted), and the `previous` chain never participates.
pub fn token_hash(record: &TokenRecord) -> Result<String, RegistryError> {
    Ok(hash_value(&sanitized_value(record)?))
}

/// Hash that an absent payload compares as: the hash of the empty map.
pub fn empty_hash() -> String {
    hash_value(&Value::Object(Map::new()))
}

/// The version an `If-Match` header is compared against. Absent and
/// soft-deleted records both compare as empty.
pub fn etag_for_match(existing: Option<&TokenRecord>) -> Result<String, RegistryError> {
    match existing {
        Some(record) if !record.is_deleted() => token_hash(record),
        _ => Ok(empty_hash()),
    }
}

/// Restrict a flat token map to the recognized token-data key set, dropping
/// nulls, empty strings and the history chain.
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sanitized: Map<String, Value> = map
                .into_iter()
                .filter(|(key, v)| is_token_data_key(key) && !is_blank(v))
                .collect();
            Value::Object(sanitized)
        }
        other => other,
    }
}

pub fn sanitized_value(record: &TokenRecord) -> Result<Value, RegistryError> {
    Ok(sanitize(record.to_value()?))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn hash_value(value: &Value) -> String {
    // Value trees always have string keys, so JSON encoding cannot fail.
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}
