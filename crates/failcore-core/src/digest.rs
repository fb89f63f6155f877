//! Canonical JSON normalization and payload fingerprints.
//!
//! Canonical form (RFC 8785-class):
//! - object keys sorted by UTF-16 code units (§3.2.3)
//! - integer-valued floats collapsed to integers
//! - compact serialization
//!
//! Fingerprints are the first 16 hex characters of the SHA-256 digest of the
//! canonical form. They key the [`crate::ScanCache`] and chain trace events.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Length of a payload fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 16;

/// Integer-valued floats collapse to integers; everything else is kept.
fn normalize_number(n: &serde_json::Number) -> serde_json::Number {
    if n.is_i64() || n.is_u64() {
        return n.clone();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
            serde_json::Number::from(f as i64)
        }
        _ => n.clone(),
    }
}

/// Write `value` into `out` with object keys in UTF-16 code unit order.
///
/// Keys are ordered here, while writing, because `serde_json::Map` keeps its
/// own (byte-wise) order and would undo a UTF-16 sort done on the map.
fn write_canonical(value: &Value, out: &mut String) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.encode_utf16().cmp(b.encode_utf16()));
            out.push('{');
            for (i, (key, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(v, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out)?;
            }
            out.push(']');
        }
        Value::Number(n) => out.push_str(&serde_json::to_string(&normalize_number(n))?),
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

/// Render a JSON value in canonical form.
///
/// `serde_json::Value` cannot hold NaN/Infinity, so the only failure mode is
/// the serializer itself.
pub fn canonical_json(value: &Value) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

/// Full SHA-256 hex digest of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// 16-hex fingerprint of a payload.
///
/// Uses canonical JSON; falls back to the plain `Display` rendering when the
/// canonical form cannot be produced.
pub fn fingerprint(payload: &Value) -> String {
    let rendered = canonical_json(payload).unwrap_or_else(|_| payload.to_string());
    let mut digest = sha256_hex(rendered.as_bytes());
    digest.truncate(FINGERPRINT_LEN);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_keys() {
        let canonical = canonical_json(&json!({"b": 1, "a": {"d": 2, "c": 3}})).unwrap();
        assert_eq!(canonical, r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn test_canonical_json_orders_keys_by_utf16_units() {
        // U+10000 encodes as D800 DC00 and sorts before U+FFFF in UTF-16,
        // but after it in UTF-8 byte order.
        let canonical = canonical_json(&json!({"\u{FFFF}": 1, "\u{10000}": 2})).unwrap();
        assert_eq!(canonical, "{\"\u{10000}\":2,\"\u{FFFF}\":1}");

        let nested = canonical_json(&json!([{"\u{FFFF}": {"b": 1, "a": 2}, "\u{10000}": null}]))
            .unwrap();
        assert_eq!(nested, "[{\"\u{10000}\":null,\"\u{FFFF}\":{\"a\":2,\"b\":1}}]");
    }

    #[test]
    fn test_canonical_json_escapes_keys_and_strings() {
        let canonical = canonical_json(&json!({"q\"k": "line\nbreak"})).unwrap();
        assert_eq!(canonical, r#"{"q\"k":"line\nbreak"}"#);
    }

    #[test]
    fn test_canonical_json_integer_float() {
        let canonical = canonical_json(&json!({ "value": 1.0 })).unwrap();
        assert_eq!(canonical, r#"{"value":1}"#);
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = fingerprint(&json!({"x": 1, "y": "two"}));
        let b = fingerprint(&json!({"y": "two", "x": 1}));
        assert_eq!(a, b);
        assert_eq!(a.len(), FINGERPRINT_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_differs_for_different_payloads() {
        assert_ne!(fingerprint(&json!("a")), fingerprint(&json!("b")));
    }
}
