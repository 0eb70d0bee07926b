//! Content fingerprints for alert records.
//!
//! A [`Fingerprint`] is the SHA-256 of a canonical JSON rendering of the
//! event: object keys sorted at every depth, `", "` and `": "` separators,
//! non-ASCII characters escaped as `\uXXXX`. This is the layout of a
//! sort-keys JSON dump, so ledgers written by earlier deployments of the
//! watcher keep matching.

use crate::event::AlertEvent;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fmt::Write as _;

/// Length of a hex-encoded SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 64;

/// Dedup key of an alert record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of an event.
    pub fn of(event: &AlertEvent) -> Self {
        let mut canonical = String::new();
        write_canonical(&Value::Object(event.to_object()), &mut canonical);

        let digest = Sha256::digest(canonical.as_bytes());
        Fingerprint(hex::encode(digest))
    }

    /// Parse a stored fingerprint. Returns `None` unless the trimmed input is
    /// exactly 64 hex characters.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.len() != FINGERPRINT_LEN || !line.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(Fingerprint(line.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render `value` in canonical form.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_ascii_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_ascii_string(key, out);
                out.push_str(": ");
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

/// Quote a string, escaping everything outside printable ASCII.
fn write_ascii_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    // Writing to a String cannot fail
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            }
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn event_from(value: Value) -> AlertEvent {
        serde_json::from_value(value).unwrap()
    }

    fn canonical(value: &Value) -> String {
        let mut out = String::new();
        write_canonical(value, &mut out);
        out
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a: AlertEvent =
            serde_json::from_str(r#"{"alertDate":"2024-01-01 00:00:00","data":"x","a":1,"b":2}"#)
                .unwrap();
        let b: AlertEvent =
            serde_json::from_str(r#"{"b":2,"a":1,"data":"x","alertDate":"2024-01-01 00:00:00"}"#)
                .unwrap();
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn test_nested_key_order_does_not_matter() {
        let a = event_from(json!({
            "alertDate": "2024-01-01 00:00:00",
            "data": {"a": 1, "b": {"x": true, "y": null}}
        }));
        let b: AlertEvent = serde_json::from_str(
            r#"{"data":{"b":{"y":null,"x":true},"a":1},"alertDate":"2024-01-01 00:00:00"}"#,
        )
        .unwrap();
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn test_value_change_changes_fingerprint() {
        let a = AlertEvent::new("2024-01-01 00:00:00", "Haifa").with_field("category", 1);
        let b = AlertEvent::new("2024-01-01 00:00:00", "Haifa").with_field("category", 2);
        let c = AlertEvent::new("2024-01-01 00:00:01", "Haifa").with_field("category", 1);
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&c));
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = Fingerprint::of(&AlertEvent::new("2024-01-01 00:00:00", "Haifa"));
        assert_eq!(fp.as_str().len(), FINGERPRINT_LEN);
        assert!(fp.as_str().bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
    }

    #[test]
    fn test_canonical_layout() {
        let value = json!({"b": [1, "two"], "a": {"d": false, "c": null}});
        assert_eq!(
            canonical(&value),
            r#"{"a": {"c": null, "d": false}, "b": [1, "two"]}"#
        );
    }

    #[test]
    fn test_canonical_escapes_non_ascii() {
        let value = json!({"data": "חיפה\n\"q\""});
        assert_eq!(
            canonical(&value),
            r#"{"data": "\u05d7\u05d9\u05e4\u05d4\n\"q\""}"#
        );
    }

    #[test]
    fn test_canonical_surrogate_pair() {
        assert_eq!(canonical(&json!("🚨")), r#""\ud83d\udea8""#);
    }

    #[test]
    fn test_known_digest() {
        // sha256 of {"alertDate": "2024-01-01 00:00:00", "data": "Haifa"}
        let event = AlertEvent::new("2024-01-01 00:00:00", "Haifa");
        let expected = hex::encode(Sha256::digest(
            br#"{"alertDate": "2024-01-01 00:00:00", "data": "Haifa"}"#,
        ));
        assert_eq!(Fingerprint::of(&event).as_str(), expected);
    }

    #[test]
    fn test_parse() {
        let fp = Fingerprint::of(&AlertEvent::new("2024-01-01 00:00:00", "Haifa"));
        assert_eq!(Fingerprint::parse(&format!("  {}\n", fp)), Some(fp.clone()));
        assert_eq!(
            Fingerprint::parse(&fp.as_str().to_ascii_uppercase()),
            Some(fp)
        );
        assert!(Fingerprint::parse("").is_none());
        assert!(Fingerprint::parse("abc123").is_none());
        assert!(Fingerprint::parse(&"z".repeat(FINGERPRINT_LEN)).is_none());
    }

    proptest! {
        #[test]
        fn prop_insertion_order_is_irrelevant(
            fields in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..8),
            seed in any::<u64>(),
        ) {
            let mut entries: Vec<(String, i64)> = fields.into_iter().collect();

            let forward: String = entries
                .iter()
                .map(|(k, v)| format!(r#""x_{}":{},"#, k, v))
                .collect();

            let len = entries.len().max(1);
            entries.rotate_left((seed as usize) % len);
            entries.reverse();
            let shuffled: String = entries
                .iter()
                .map(|(k, v)| format!(r#""x_{}":{},"#, k, v))
                .collect();

            let a: AlertEvent = serde_json::from_str(&format!(
                r#"{{{}"alertDate":"2024-01-01 00:00:00","data":"x"}}"#, forward
            )).unwrap();
            let b: AlertEvent = serde_json::from_str(&format!(
                r#"{{"data":"x",{}"alertDate":"2024-01-01 00:00:00"}}"#, shuffled
            )).unwrap();

            prop_assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
        }
    }
}
