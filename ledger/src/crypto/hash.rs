//! # Hashing Utilities
//!
//! One digest for every integrity-critical purpose: SHA-256, hex-encoded.
//! Receipt fingerprints and audit block hashes go through the same
//! function, so there is exactly one hash strength to reason about.
//!
//! ## Canonical JSON
//!
//! Audit payloads are hashed as JSON. JSON objects are unordered, so two
//! processes serializing the same map can disagree on byte order and
//! therefore on the hash. [`canonical_json`] fixes that: object keys are
//! sorted, no whitespace is emitted, and arrays keep their order.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data.
///
/// # Example
///
/// ```
/// use blackbox_ledger::crypto::sha256;
///
/// let hash = sha256(b"receipt bytes");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// SHA-256 of `data`, as 64 lowercase hex characters.
///
/// This is the receipt fingerprint and the audit block hash format.
pub fn digest_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Render a JSON value canonically: sorted object keys, compact separators.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Serialize any value to canonical JSON.
///
/// Fails only if `value` cannot be represented as JSON at all (e.g. a map
/// with non-string keys).
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    Ok(canonical_json(&value))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // A String always serializes; the fallback is unreachable.
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
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
        scalar => out.push_str(&scalar.to_string()),
    }
}
