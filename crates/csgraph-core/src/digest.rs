//! # Content Digests
//!
//! Structural identity for content-addressed documents.
//!
//! A digest is the BLAKE3 hash of the canonical JSON form of a value:
//! object members sorted by name, no insignificant whitespace. Two values
//! that are structurally equal always produce the same digest, whatever
//! the order their fields were written in.

use crate::types::CsGraphError;
use serde::Serialize;
use serde_json::Value;

/// Render a JSON value in canonical form.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (name, member)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(member, out);
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

/// Hex encoded BLAKE3 digest of the canonical JSON form of `value`.
pub fn content_digest<T: Serialize + ?Sized>(value: &T) -> Result<String, CsGraphError> {
    let json = serde_json::to_value(value)?;
    Ok(blake3::hash(canonical_json(&json).as_bytes())
        .to_hex()
        .to_string())
}

// =============================================================================
// TESTS
// =============================================================================
