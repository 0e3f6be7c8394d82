//! Canonical JSON encoding and SHA-256 digesting.
//!
//! Every hash and MAC the gateway produces is computed over canonical JSON:
//! object keys sorted lexicographically at every nesting level, compact
//! separators, arrays in submitted order, UTF-8 preserved literally. Clients
//! signing challenge messages in other languages must produce the identical
//! byte sequence, so the encoding here has no room for discretion.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Canonicalize any serializable value.
///
/// Round-trips through `serde_json::Value` first so struct field order never
/// leaks into the output; objects are then emitted with sorted keys at every
/// level.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    canonical_value(&v)
}

fn canonical_value(value: &serde_json::Value) -> Result<String, serde_json::Error> {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);

            let mut out = String::from("{");
            for (i, (k, v)) in pairs.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k)?);
                out.push(':');
                out.push_str(&canonical_value(v)?);
            }
            out.push('}');
            Ok(out)
        }
        serde_json::Value::Array(items) => {
            let mut out = String::from("[");
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonical_value(v)?);
            }
            out.push(']');
            Ok(out)
        }
        // Scalars: serde_json already emits the shortest round-tripping form.
        _ => serde_json::to_string(value),
    }
}

/// SHA-256 of the canonical encoding, hex lower-case.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Raw SHA-256, hex lower-case.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_at_every_level() {
        let v = json!({"z": {"b": 1, "a": 2}, "a": [{"y": 0, "x": 1}]});
        let c = canonical_json(&v).unwrap();
        assert_eq!(c, r#"{"a":[{"x":1,"y":0}],"z":{"a":2,"b":1}}"#);
    }

    #[test]
    fn arrays_keep_order() {
        let v = json!([3, 1, 2]);
        assert_eq!(canonical_json(&v).unwrap(), "[3,1,2]");
    }

    #[test]
    fn no_whitespace_and_escaped_strings() {
        let v = json!({"msg": "hello \"world\"", "n": null});
        assert_eq!(
            canonical_json(&v).unwrap(),
            r#"{"msg":"hello \"world\"","n":null}"#
        );
    }

    #[test]
    fn utf8_preserved_literally() {
        let v = json!({"name": "café ☕"});
        assert_eq!(canonical_json(&v).unwrap(), "{\"name\":\"café ☕\"}");
    }

    #[test]
    fn reparse_is_a_fixed_point() {
        let v = json!({"b": [1, 2.5, "x"], "a": {"k": true}});
        let once = canonical_json(&v).unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&once).unwrap();
        assert_eq!(canonical_json(&reparsed).unwrap(), once);
    }

    #[test]
    fn challenge_message_shape() {
        // The exact byte sequence agents sign during the handshake.
        let v = json!({"nonce": "abc", "agent_id": "a1"});
        assert_eq!(
            canonical_json(&v).unwrap(),
            r#"{"agent_id":"a1","nonce":"abc"}"#
        );
    }

    #[test]
    fn hash_is_deterministic() {
        let v = json!({"intent": "t", "version": 1});
        let h1 = canonical_hash(&v).unwrap();
        let h2 = canonical_hash(&v).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }
}
