//! Tolerant field access over a decoded payload tree.
//!
//! The server is known to mix English and Spanish field names and to move
//! between flat and nested payload shapes across protocol versions, so every
//! accessor takes a list of accepted key aliases and treats missing, `null`,
//! or wrong-typed values as "absent" rather than as an error.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// First present, non-null value among the given key aliases.
pub fn get<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let obj = payload.as_object()?;
    keys.iter()
        .find_map(|k| obj.get(*k))
        .filter(|v| !v.is_null())
}

/// String field. Bare numbers are accepted and rendered, since the server
/// is inconsistent about quoting ids.
pub fn str_field(payload: &Value, keys: &[&str]) -> Option<String> {
    match get(payload, keys)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integer field; numeric strings are accepted.
pub fn i64_field(payload: &Value, keys: &[&str]) -> Option<i64> {
    match get(payload, keys)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Boolean field; `"true"` / `"false"` strings are accepted.
pub fn bool_field(payload: &Value, keys: &[&str]) -> Option<bool> {
    match get(payload, keys)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Timestamp field: epoch milliseconds or an RFC-3339 string.
pub fn timestamp_field(payload: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    match get(payload, keys)? {
        Value::Number(n) => n.as_i64().and_then(millis_to_utc),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.trim().parse::<i64>().ok().and_then(millis_to_utc)),
        _ => None,
    }
}

fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Unwrap one extra nesting level: newer servers wrap the real event fields
/// in an inner `message` / `payload` sub-object. At most one level is
/// unwrapped.
pub fn unwrap_inner(payload: &Value) -> &Value {
    if let Some(obj) = payload.as_object() {
        for key in ["message", "payload", "mensaje"] {
            if let Some(inner) = obj.get(key) {
                if inner.is_object() {
                    return inner;
                }
            }
        }
    }
    payload
}

/// Interpret a list-style payload as a sequence of items.
///
/// Accepted shapes, in order:
/// - the payload itself is an array;
/// - an object whose first present alias among `keys` holds an array (or a
///   string containing a JSON array);
/// - a string containing a JSON array.
///
/// Anything else (including a missing payload) yields an empty list; list
/// callers never see a parse error.
pub fn payload_items(payload: Option<&Value>, keys: &[&str]) -> Vec<Value> {
    let Some(payload) = payload else {
        return Vec::new();
    };
    match payload {
        Value::Array(items) => items.clone(),
        Value::Object(_) => match get(payload, keys) {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::String(s)) => parse_embedded_array(s),
            _ => Vec::new(),
        },
        Value::String(s) => parse_embedded_array(s),
        _ => Vec::new(),
    }
}

/// Some server builds double-encode list payloads as a JSON string. Parsing
/// the embedded text as JSON handles nested objects and braces inside
/// string literals correctly.
fn parse_embedded_array(s: &str) -> Vec<Value> {
    match serde_json::from_str::<Value>(s) {
        Ok(Value::Array(items)) => items,
        Ok(_) | Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aliases_and_null() {
        let v = json!({"senderId": 7, "name": null});
        assert_eq!(i64_field(&v, &["emisorId", "senderId"]), Some(7));
        assert_eq!(str_field(&v, &["name"]), None);
        assert_eq!(str_field(&v, &["missing"]), None);
    }

    #[test]
    fn test_numeric_string_coercion() {
        let v = json!({"id": "42", "online": "true", "n": 9});
        assert_eq!(i64_field(&v, &["id"]), Some(42));
        assert_eq!(bool_field(&v, &["online"]), Some(true));
        assert_eq!(str_field(&v, &["n"]), Some("9".to_string()));
    }

    #[test]
    fn test_timestamp_both_shapes() {
        let v = json!({"a": 1_700_000_000_000i64, "b": "2024-05-01T10:30:00Z"});
        let a = timestamp_field(&v, &["a"]).unwrap();
        assert_eq!(a.timestamp_millis(), 1_700_000_000_000);
        let b = timestamp_field(&v, &["b"]).unwrap();
        assert_eq!(b.to_rfc3339(), "2024-05-01T10:30:00+00:00");
    }

    #[test]
    fn test_unwrap_inner_one_level() {
        let flat = json!({"senderId": 1});
        assert_eq!(unwrap_inner(&flat)["senderId"], 1);

        let nested = json!({"tipo": "NEW_MESSAGE", "message": {"senderId": 2}});
        assert_eq!(unwrap_inner(&nested)["senderId"], 2);

        // Only one level is unwrapped.
        let double = json!({"message": {"message": {"senderId": 3}}});
        assert!(unwrap_inner(&double).get("senderId").is_none());
    }

    #[test]
    fn test_payload_items_shapes() {
        let direct = json!([{"id": 1}, {"id": 2}]);
        assert_eq!(payload_items(Some(&direct), &[]).len(), 2);

        let wrapped = json!({"usuarios": [{"id": 1}]});
        assert_eq!(payload_items(Some(&wrapped), &["users", "usuarios"]).len(), 1);

        // Double-encoded, with braces and brackets inside a string literal.
        let embedded = json!({"channels": r#"[{"name":"a{b}[c]","id":1},{"id":2}]"#});
        let items = payload_items(Some(&embedded), &["channels"]);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["name"], "a{b}[c]");

        assert!(payload_items(None, &["x"]).is_empty());
        assert!(payload_items(Some(&json!("garbage")), &["x"]).is_empty());
        assert!(payload_items(Some(&json!(5)), &["x"]).is_empty());
    }
}
