//! Canonical JSON and content hashing.
//!
//! Canonical form: object keys sorted lexicographically at every depth, no
//! insignificant whitespace, numbers in `serde_json`'s minimal formatting.
//! The content hash is SHA-256 over the canonical bytes and is the card
//! deduplication key.

use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;

use crate::types::ContentHash;

/// Serialize `value` into canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::with_capacity(256);
    write_canonical(value, &mut out);
    out
}

/// SHA-256 over the canonical JSON bytes of `value`.
pub fn content_hash(value: &Value) -> ContentHash {
    let canonical = canonical_json(value);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    ContentHash(bytes)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_escaped(s, out),
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
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn write_escaped(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                use std::fmt::Write;
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted_at_every_depth() {
        let value = json!({"b": {"z": 1, "a": 2}, "a": [{"y": 0, "x": 1}]});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":[{"x":1,"y":0}],"b":{"a":2,"z":1}}"#
        );
    }

    #[test]
    fn test_no_insignificant_whitespace() {
        let value: Value = serde_json::from_str(r#"{ "a" : [ 1 , 2 ] }"#).unwrap();
        assert_eq!(canonical_json(&value), r#"{"a":[1,2]}"#);
    }

    #[test]
    fn test_string_escapes() {
        let value = json!({"k": "line\nbreak \"quoted\" \u{01}"});
        assert_eq!(
            canonical_json(&value),
            r#"{"k":"line\nbreak \"quoted\" \u0001"}"#
        );
    }

    #[test]
    fn test_hash_insensitive_to_key_order() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":{"p":true,"q":null}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":{"q":null,"p":true},"x":1}"#).unwrap();
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_hash_sensitive_to_values() {
        let a = json!({"x": 1});
        let b = json!({"x": 2});
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    fn arb_json(depth: u32) -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-zA-Z0-9 _-]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(depth, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_canonicalization_is_idempotent(value in arb_json(3)) {
            let once = canonical_json(&value);
            let reparsed: Value = serde_json::from_str(&once).unwrap();
            prop_assert_eq!(canonical_json(&reparsed), once);
        }

        #[test]
        fn prop_canonical_form_parses_to_equal_value(value in arb_json(3)) {
            let reparsed: Value = serde_json::from_str(&canonical_json(&value)).unwrap();
            prop_assert_eq!(content_hash(&reparsed), content_hash(&value));
        }
    }
}
