//! Reference values inside payloads
//!
//! Relation and media attributes arrive in several shapes: bare ids, `{"id": n}`
//! objects (possibly populated with more fields), or arrays of either. Cleaned
//! payloads replace them with `{"__ref": "<type>#<id>"}` markers so references
//! can be rewritten per instance before comparison.

use serde_json::{Map, Value};

/// Key of the marker object substituted for a reference
pub const REF_MARKER: &str = "__ref";

/// Internal ids referenced by a relation or media value, in order
pub fn reference_ids(value: &Value) -> Vec<i64> {
    match value {
        Value::Array(items) => items.iter().filter_map(single_reference_id).collect(),
        other => single_reference_id(other).into_iter().collect(),
    }
}

fn single_reference_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::Object(map) => map.get("id").and_then(Value::as_i64),
        _ => None,
    }
}

/// Normalize a single reference to `{"id": n}`
pub fn id_object(id: i64) -> Value {
    let mut map = Map::new();
    map.insert("id".to_string(), Value::from(id));
    Value::Object(map)
}

/// Build the cleaned-payload marker for a reference
pub fn marker(content_type: &str, id: i64) -> Value {
    let mut map = Map::new();
    map.insert(
        REF_MARKER.to_string(),
        Value::String(format!("{}#{}", content_type, id)),
    );
    Value::Object(map)
}

/// Parse a marker back into (content type, internal id)
pub fn parse_marker(value: &Value) -> Option<(&str, i64)> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    let raw = map.get(REF_MARKER)?.as_str()?;
    let (content_type, id) = raw.rsplit_once('#')?;
    Some((content_type, id.parse().ok()?))
}
