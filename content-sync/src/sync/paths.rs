//! Dot-joined field paths into entity payloads
//!
//! Paths address nested values the same way the extractor names them:
//! object keys and array indices joined by dots ("blocks.0.image").

use serde_json::Value;

/// Append a segment to a path prefix
pub fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", prefix, segment)
    }
}

/// Resolve a path against a payload
///
/// Numeric segments index into arrays; everything else is an object key.
pub fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Remove the value at a path, returning it if present
///
/// Array entries are removed outright; object keys are deleted.
pub fn remove(value: &mut Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let (last, parents) = segments.split_last()?;

    let mut current = value;
    for segment in parents {
        current = match current {
            Value::Object(map) => map.get_mut(*segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    match current {
        Value::Object(map) => map.remove(*last),
        Value::Array(items) => {
            let idx = last.parse::<usize>().ok()?;
            (idx < items.len()).then(|| items.remove(idx))
        }
        _ => None,
    }
}

/// Whether `path` equals `prefix` or lies underneath it
pub fn starts_with(path: &str, prefix: &str) -> bool {
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join() {
        assert_eq!(join("", "cover"), "cover");
        assert_eq!(join("blocks.0", "image"), "blocks.0.image");
    }

    #[test]
    fn test_resolve_nested_path() {
        let payload = json!({
            "seo": {"shareImage": {"id": 4}},
            "blocks": [{"title": "a"}, {"image": {"id": 9}}]
        });

        assert_eq!(resolve(&payload, "seo.shareImage.id"), Some(&json!(4)));
        assert_eq!(resolve(&payload, "blocks.1.image"), Some(&json!({"id": 9})));
        assert_eq!(resolve(&payload, "blocks.5.image"), None);
        assert_eq!(resolve(&payload, "seo.missing"), None);
    }

    #[test]
    fn test_remove_object_key_and_array_entry() {
        let mut payload = json!({
            "seo": {"metaTitle": "x", "metaDescription": "y"},
            "tags": ["a", "b", "c"]
        });

        assert_eq!(remove(&mut payload, "seo.metaTitle"), Some(json!("x")));
        assert_eq!(remove(&mut payload, "tags.1"), Some(json!("b")));
        assert_eq!(remove(&mut payload, "nothing.here"), None);
        assert_eq!(payload, json!({"seo": {"metaDescription": "y"}, "tags": ["a", "c"]}));
    }

    #[test]
    fn test_starts_with_respects_segments() {
        assert!(starts_with("seo.shareImage", "seo"));
        assert!(starts_with("seo", "seo"));
        assert!(!starts_with("seoTitle", "seo"));
    }
}
