//! Snapshot integrity
//!
//! Fast, non-cryptographic checksums over serialized state, and the
//! `VersionedData` envelope every persisted snapshot is wrapped in.
//!
//! The hash is the classic 31-multiplier string hash over the UTF-16 code
//! units of the compact JSON (object keys sorted), rendered as signed hex.
//! Only envelopes written by this crate are comparable; serializers that
//! keep insertion order produce different text for the same object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A state snapshot plus the metadata needed to trust it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionedData<T> {
    pub data: T,
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub checksum: String,
    pub id: String,
}

impl VersionedData<Value> {
    /// Wrap `data`, stamping a fresh id, the current time and its checksum
    pub fn new(data: Value, version: u32) -> Self {
        let checksum = generate_checksum(&data);
        Self {
            data,
            version,
            timestamp: Utc::now(),
            checksum,
            id: Uuid::new_v4().to_string(),
        }
    }
}

/// Compute the checksum of a JSON value.
///
/// Object keys are written in sorted order, so the same logical state always
/// hashes the same regardless of how it was built.
pub fn generate_checksum(data: &Value) -> String {
    let mut serialized = String::new();
    write_canonical(data, &mut serialized);
    let mut hash: i32 = 0;
    for unit in serialized.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    if hash < 0 {
        format!("-{:x}", hash.unsigned_abs())
    } else {
        format!("{:x}", hash)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
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

/// Check that an envelope's checksum matches its payload
pub fn validate_data_integrity(envelope: &VersionedData<Value>) -> bool {
    generate_checksum(&envelope.data) == envelope.checksum
}
