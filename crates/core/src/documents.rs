//! Helpers for working with raw `serde_json::Value` documents.

use serde_json::{Map, Value};

/// Field under which every document carries its identifier.
pub const ID_FIELD: &str = "id";

/// A required string field, trimmed; `None` when absent, null, or empty.
pub fn str_field<'a>(document: &'a Value, field: &str) -> Option<&'a str> {
    document
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// The document's identifier, if present.
pub fn doc_id(document: &Value) -> Option<&str> {
    str_field(document, ID_FIELD)
}

/// A string-array field; missing fields read as empty.
pub fn str_list_field(document: &Value, field: &str) -> Vec<String> {
    document
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Whether the document carries a truthy soft-delete marker.
pub fn is_deleted(document: &Value) -> bool {
    document
        .get("deleted")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Merges `partial` into `base`, field by field. Top-level only: the hosted
/// store applies partial updates the same way.
pub fn merge_partial(base: &mut Value, partial: &Value) {
    let (Some(base_map), Some(partial_map)) = (base.as_object_mut(), partial.as_object()) else {
        return;
    };
    for (key, value) in partial_map {
        base_map.insert(key.clone(), value.clone());
    }
}

/// Replaces every string value equal to a key of `mapping` anywhere in the
/// document, including the id field. Used to rewrite temporary identifiers
/// once the server has assigned real ones.
pub fn rewrite_string_values(document: &mut Value, mapping: &dyn Fn(&str) -> Option<String>) {
    match document {
        Value::String(s) => {
            if let Some(replacement) = mapping(s) {
                *s = replacement;
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_string_values(item, mapping);
            }
        }
        Value::Object(map) => {
            for (_, value) in map.iter_mut() {
                rewrite_string_values(value, mapping);
            }
        }
        _ => {}
    }
}

/// An object document with its id set, built from parts.
pub fn with_id(mut fields: Map<String, Value>, id: &str) -> Value {
    fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    Value::Object(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_partial_overwrites_only_given_fields() {
        let mut base = json!({"id": "a1", "balance": 10.0, "currency": "EUR"});
        merge_partial(&mut base, &json!({"balance": 12.5}));
        assert_eq!(base, json!({"id": "a1", "balance": 12.5, "currency": "EUR"}));
    }

    #[test]
    fn rewrite_replaces_nested_and_top_level_references() {
        let mut doc = json!({
            "id": "temp-1",
            "accountId": "temp-1",
            "tags": ["temp-1", "keep"],
            "nested": {"ref": "temp-1"}
        });
        rewrite_string_values(&mut doc, &|s| {
            (s == "temp-1").then(|| "srv-9".to_string())
        });
        assert_eq!(
            doc,
            json!({
                "id": "srv-9",
                "accountId": "srv-9",
                "tags": ["srv-9", "keep"],
                "nested": {"ref": "srv-9"}
            })
        );
    }

    #[test]
    fn deleted_flag_defaults_to_false() {
        assert!(!is_deleted(&json!({"id": "t1"})));
        assert!(is_deleted(&json!({"id": "t1", "deleted": true})));
    }
}
