// ABOUTME: Stable hashing of tool invocations for dedup and loop detection
// ABOUTME: Canonicalizes argument JSON (key-order independent) before SHA-256

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hash substituted when arguments cannot be canonicalized.
///
/// Observing a broken argument payload is still useful signal for loop
/// detection, so hashing failures map to a sentinel instead of an error.
pub const SENTINEL_HASH: &str = "unhashable";

/// Signature of a single tool invocation: tool name plus argument hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToolSignature {
    pub tool_name: String,
    pub arg_hash: String,
}

impl ToolSignature {
    pub fn new(tool_name: impl Into<String>, args: &Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arg_hash: canonical_hash(args),
        }
    }
}

/// Compute a stable, key-order-independent hash of a JSON value.
///
/// Objects are re-serialized with sorted keys at every nesting level, so
/// `{"a":1,"b":2}` and `{"b":2,"a":1}` hash identically. Returns a
/// 16-character hex digest (truncated SHA-256).
pub fn canonical_hash(value: &Value) -> String {
    match canonical_string(value) {
        Some(canonical) => {
            let digest = Sha256::digest(canonical.as_bytes());
            let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
            hex[..16].to_string()
        }
        None => SENTINEL_HASH.to_string(),
    }
}

/// Fingerprint a tool invocation for deduplication: name plus canonical args.
///
/// Unlike [`canonical_hash`] this covers the tool name as well, so two tools
/// called with identical arguments produce distinct fingerprints.
pub fn tool_fingerprint(tool_name: &str, args: &Value) -> String {
    let canonical = canonical_string(args).unwrap_or_else(|| SENTINEL_HASH.to_string());
    let material = format!("{}:{}", tool_name, canonical);
    let digest = Sha256::digest(material.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn canonical_string(value: &Value) -> Option<String> {
    serde_json::to_string(&sort_keys(value)).ok()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            // BTreeMap iteration is sorted; rebuilding through it normalizes
            // key order at every level.
            let sorted: std::collections::BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, sort_keys(v))).collect();
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), v))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
