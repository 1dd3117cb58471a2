//! Token records: the flat kebab-case map persisted per token and carried on
//! the wire, split into service parameters and registry metadata.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::{RegistryError, UpdateMode};

/// The schema-defined service parameter key set. Request bodies may only
/// carry these (plus `token` and the metadata keys); sanitization restricts
/// hashing to this set as well.
pub const RECOGNIZED_PARAMS: &[&str] = &[
    "authentication",
    "backend-proto",
    "cmd",
    "cmd-type",
    "concurrency-level",
    "cpus",
    "env",
    "fallback-period-secs",
    "grace-period-secs",
    "health-check-interval-secs",
    "health-check-max-consecutive-failures",
    "health-check-url",
    "https-redirect",
    "idle-timeout-mins",
    "interstitial-secs",
    "liveness-check-url",
    "mem",
    "metric-group",
    "name",
    "permitted-user",
    "ports",
    "run-as-user",
    "stale-timeout-mins",
    "version",
];

/// Parameters that must all be present before a description can run
/// unauthenticated or serve an interstitial.
pub const REQUIRED_PARAMS: &[&str] = &["cmd", "cpus", "mem", "ports", "run-as-user", "version"];

pub const USER_METADATA_KEYS: &[&str] = &["owner"];

pub const SYSTEM_METADATA_KEYS: &[&str] = &[
    "cluster",
    "deleted",
    "last-update-time",
    "last-update-user",
    "previous",
    "root",
];

/// Cap on recognized-but-untyped parameters carried in one record.
const MAX_EXTRA_PARAMS: usize = 16;

/// True for keys that participate in the content hash: every recognized
/// parameter plus the metadata keys, `previous` excluded.
pub fn is_token_data_key(key: &str) -> bool {
    RECOGNIZED_PARAMS.contains(&key)
        || USER_METADATA_KEYS.contains(&key)
        || (SYSTEM_METADATA_KEYS.contains(&key) && key != "previous")
}

fn is_metadata_key(key: &str) -> bool {
    USER_METADATA_KEYS.contains(&key) || SYSTEM_METADATA_KEYS.contains(&key)
}

// ============================================================================
// Service parameters
// ============================================================================

/// The service description template held by a token. Every field is optional:
/// a token may describe only part of a runnable service until composed with
/// defaults elsewhere in the platform.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_proto: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_interval_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_max_consecutive_failures: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_mins: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interstitial_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permitted_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Recognized parameters without a typed field yet. Bounded; unknown
    /// keys landing here are rejected by request validation.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ServiceParams {
    pub fn is_empty(&self) -> bool {
        *self == ServiceParams::default()
    }

    /// Flat map view of the set parameters, for completeness checks and
    /// listing filters.
    pub fn as_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

// ============================================================================
// Registry metadata
// ============================================================================

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TokenMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    /// Soft-deletion tombstone. Absent counts as live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    /// Epoch milliseconds. Accepted on the wire as either an integer or an
    /// ISO-8601 timestamp string (admin writes).
    #[serde(
        default,
        deserialize_with = "de_update_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_update_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// History chain, newest first, bounded by the configured length.
    #[serde(
        default,
        deserialize_with = "de_previous",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub previous: Vec<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

fn de_update_time<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| {
            D::Error::custom("last-update-time must be an integer epoch-milliseconds value")
        }),
        Some(Value::String(s)) => chrono::DateTime::parse_from_rfc3339(&s)
            .map(|dt| Some(dt.timestamp_millis()))
            .map_err(|_| {
                D::Error::custom(format!("last-update-time {s} is not a valid ISO-8601 timestamp"))
            }),
        Some(_) => Err(D::Error::custom(
            "last-update-time must be epoch milliseconds or an ISO-8601 timestamp",
        )),
    }
}

fn de_previous<'de, D>(deserializer: D) -> Result<Vec<Map<String, Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(map)) => Ok(vec![map]),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                _ => Err(D::Error::custom("previous entries must be mappings")),
            })
            .collect(),
        Some(_) => Err(D::Error::custom("previous must be a mapping")),
    }
}

// ============================================================================
// Token record
// ============================================================================

/// One token: service parameters merged with registry metadata into a single
/// flat map, which is both the wire shape and the KV value shape.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TokenRecord {
    #[serde(flatten)]
    pub metadata: TokenMetadata,
    #[serde(flatten)]
    pub params: ServiceParams,
}

impl TokenRecord {
    /// Decode a flat map. The flattened `extra` bag claims every key the
    /// typed fields do not, so metadata keys (and the `token` name field of
    /// request bodies) are stripped back out of it here; all decoding must
    /// go through this constructor.
    pub fn from_value(value: &Value) -> Result<Self, RegistryError> {
        let mut record: TokenRecord = serde_json::from_value(value.clone())
            .map_err(|e| RegistryError::Validation(e.to_string()))?;
        record
            .params
            .extra
            .retain(|key, _| !is_metadata_key(key) && key != "token");
        Ok(record)
    }

    pub fn to_value(&self) -> Result<Value, RegistryError> {
        serde_json::to_value(self)
            .map_err(|e| RegistryError::Internal(format!("Token record encoding failed: {e}")))
    }

    pub fn is_deleted(&self) -> bool {
        self.metadata.deleted.unwrap_or(false)
    }

    pub fn owner(&self) -> Option<&str> {
        self.metadata.owner.as_deref().filter(|o| !o.trim().is_empty())
    }

    /// A record with no parameters and no user metadata is treated as absent
    /// by the delete pipeline.
    pub fn is_empty_shell(&self) -> bool {
        self.params.is_empty() && self.metadata.owner.is_none()
    }

    /// Push the prior version onto the history chain, newest first. The
    /// snapshot drops its own `previous` key so chains stay flat; the chain
    /// is truncated to `limit`, oldest entries first.
    pub fn push_history(&mut self, existing: &TokenRecord, limit: usize) -> Result<(), RegistryError> {
        let mut chain = Vec::with_capacity(limit);
        if let Value::Object(mut snapshot) = existing.to_value()? {
            snapshot.remove("previous");
            chain.push(snapshot);
        }
        chain.extend(existing.metadata.previous.iter().cloned());
        chain.truncate(limit);
        self.metadata.previous = chain;
        Ok(())
    }
}

// ============================================================================
// Request validation
// ============================================================================

pub fn validate_token_name(
    name: &str,
    reserved: &BTreeSet<String>,
) -> Result<(), RegistryError> {
    if name.trim().is_empty() {
        return Err(RegistryError::Validation("Token name is required".to_string()));
    }
    if reserved.contains(name) {
        return Err(RegistryError::Validation(format!(
            "Token name {name} is reserved"
        )));
    }

    let starts_ok = name
        .chars()
        .next()
        .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .unwrap_or(false);
    let chars_ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));
    if !starts_ok || !chars_ok {
        return Err(RegistryError::Validation(format!(
            "Token name {name} is invalid; use lowercase letters, digits, hyphens, underscores and dots"
        )));
    }
    Ok(())
}

/// Preconditions checked before the mutation lock is taken.
pub fn validate_request(record: &TokenRecord, mode: UpdateMode) -> Result<(), RegistryError> {
    for key in record.params.extra.keys() {
        if !RECOGNIZED_PARAMS.contains(&key.as_str()) {
            return Err(RegistryError::Validation(format!("Unsupported key {key}")));
        }
    }
    if record.params.extra.len() > MAX_EXTRA_PARAMS {
        return Err(RegistryError::Validation(format!(
            "At most {MAX_EXTRA_PARAMS} auxiliary parameters are supported"
        )));
    }

    if record.params.is_empty() && record.metadata.owner.is_none() {
        return Err(RegistryError::Validation(
            "No user-editable fields provided".to_string(),
        ));
    }

    if record.params.authentication.as_deref() == Some("disabled") {
        if record.params.permitted_user.as_deref() != Some("*") {
            return Err(RegistryError::Validation(
                "Disabled authentication requires permitted-user to be *".to_string(),
            ));
        }
        require_complete(&record.params, "disabled authentication")?;
    }
    if record.params.interstitial_secs.is_some() {
        require_complete(&record.params, "interstitial-secs")?;
    }

    if mode == UpdateMode::Normal {
        let md = &record.metadata;
        let offending = [
            ("deleted", md.deleted.is_some()),
            ("last-update-time", md.last_update_time.is_some()),
            ("last-update-user", md.last_update_user.is_some()),
            ("previous", !md.previous.is_empty()),
            ("root", md.root.is_some()),
        ];
        for (key, present) in offending {
            if present {
                return Err(RegistryError::Validation(format!(
                    "Cannot modify {key} without admin mode"
                )));
            }
        }
    }

    Ok(())
}

fn require_complete(params: &ServiceParams, reason: &str) -> Result<(), RegistryError> {
    let map = params.as_map();
    let missing: Vec<&str> = REQUIRED_PARAMS
        .iter()
        .filter(|key| !map.contains_key(**key))
        .copied()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RegistryError::Validation(format!(
            "{} requires a complete description; missing: {}",
            reason,
            missing.join(", ")
        )))
    }
}

// ============================================================================
// Description validation seam
// ============================================================================

/// Shape validation of service parameters. Deeper semantic validation (image
/// existence, port reachability, scheduler constraints) lives with the
/// scheduler and is out of scope here.
pub trait DescriptionValidator: Send + Sync {
    fn validate(&self, params: &ServiceParams) -> Result<(), String>;
}

pub struct SyntacticValidator;

impl DescriptionValidator for SyntacticValidator {
    fn validate(&self, params: &ServiceParams) -> Result<(), String> {
        if let Some(cpus) = params.cpus {
            if !(cpus > 0.0) {
                return Err("cpus must be a positive number".to_string());
            }
        }
        if params.mem == Some(0) {
            return Err("mem must be a positive number of MiB".to_string());
        }
        if let Some(ports) = params.ports {
            if !(1..=10).contains(&ports) {
                return Err("ports must be between 1 and 10".to_string());
            }
        }
        if params.concurrency_level == Some(0) {
            return Err("concurrency-level must be at least 1".to_string());
        }
        if let Some(ref auth) = params.authentication {
            if auth != "disabled" && auth != "standard" {
                return Err(format!("Unsupported authentication {auth}"));
            }
        }
        for (field, value) in [
            ("cmd", &params.cmd),
            ("permitted-user", &params.permitted_user),
            ("run-as-user", &params.run_as_user),
            ("version", &params.version),
        ] {
            if let Some(v) = value {
                if v.trim().is_empty() {
                    return Err(format!("{field} must not be blank"));
                }
            }
        }
        if let Some(ref url) = params.health_check_url {
            if !url.starts_with('/') {
                return Err("health-check-url must be an absolute path".to_string());
            }
        }
        Ok(())
    }
}
