//! Request path and query-string helpers.

use serde_json::{Map, Value};
use url::form_urlencoded;

/// Query parameters in caller order. `None` values are dropped when encoding.
pub type QueryParams = Vec<(String, Option<String>)>;

/// Append the encoded query to `action` and prefix it with `doc_root`.
///
/// Parameters without a value are dropped. When nothing is left no `?` is
/// appended. `doc_root` and `action` are joined with exactly one `/`.
pub fn build_action(doc_root: Option<&str>, action: &str, params: &[(String, Option<String>)]) -> String {
    let mut action = action.to_string();
    if let Some(query) = encode_query(params) {
        action.push('?');
        action.push_str(&query);
    }
    match doc_root {
        Some(root) if !root.is_empty() => join_doc_root(root, &action),
        _ => action,
    }
}

/// Form-encode the parameters that carry a value.
pub fn encode_query(params: &[(String, Option<String>)]) -> Option<String> {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut any = false;
    for (key, value) in params {
        if let Some(value) = value {
            serializer.append_pair(key, value);
            any = true;
        }
    }
    any.then(|| serializer.finish())
}

/// Join a document root and a path with a single separating slash.
pub fn join_doc_root(doc_root: &str, action: &str) -> String {
    format!(
        "{}/{}",
        doc_root.trim_end_matches('/'),
        action.trim_start_matches('/')
    )
}

/// Reduce `actual` to the allowed keys, flattening its `filters` object.
///
/// Entries of `filters` become individual parameters; allowed top-level keys
/// are copied over them. JSON `null` becomes an absent value, strings are
/// used as-is and everything else is rendered as JSON text.
pub fn extract_params(actual: &Map<String, Value>, allowed: &[&str]) -> QueryParams {
    let mut result: QueryParams = Vec::new();

    if let Some(Value::Object(filters)) = actual.get("filters") {
        for (key, value) in filters {
            upsert(&mut result, key, render(value));
        }
    }

    for key in allowed {
        if let Some(value) = actual.get(*key) {
            upsert(&mut result, key, render(value));
        }
    }

    result
}

fn upsert(params: &mut QueryParams, key: &str, value: Option<String>) {
    match params.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value,
        None => params.push((key.to_string(), value)),
    }
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
