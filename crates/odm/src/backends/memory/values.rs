//! Path access and ordering over JSON documents

use std::cmp::Ordering;

use serde_json::{Map, Value};

/// Resolve a dotted path. Arrays on the way are traversed element-wise and the
/// collected values come back as an array; missing fields yield `None`.
pub(crate) fn get_path(value: &Value, path: &str) -> Option<Value> {
    let parts: Vec<&str> = path.split('.').collect();
    get_parts(value, &parts)
}

fn get_parts(value: &Value, parts: &[&str]) -> Option<Value> {
    let Some((head, rest)) = parts.split_first() else {
        return Some(value.clone());
    };

    match value {
        Value::Object(map) => map.get(*head).and_then(|child| get_parts(child, rest)),
        Value::Array(items) => {
            let collected: Vec<Value> = items
                .iter()
                .filter(|item| item.is_object())
                .filter_map(|item| get_parts(item, parts))
                .flat_map(|v| match v {
                    Value::Array(inner) if !rest.is_empty() => inner,
                    other => vec![other],
                })
                .collect();
            Some(Value::Array(collected))
        }
        _ => None,
    }
}

/// Values a query predicate is tested against: the value itself and, for
/// arrays, each element.
pub(crate) fn candidates(value: &Value, path: &str) -> Option<Vec<Value>> {
    get_path(value, path).map(|found| match found {
        Value::Array(items) => {
            let mut all = items.clone();
            all.push(Value::Array(items));
            all
        }
        other => vec![other],
    })
}

/// Values used for `$lookup` equality: array elements, or `null` when missing.
pub(crate) fn join_values(value: &Value, path: &str) -> Vec<Value> {
    match get_path(value, path) {
        None | Some(Value::Null) => vec![Value::Null],
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
    }
}

/// Set a dotted path, creating intermediate objects as needed
pub(crate) fn set_path(doc: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                set_path(child, rest, value);
            }
        }
    }
}

/// Remove a dotted path, descending into arrays of objects
pub(crate) fn remove_path(value: &mut Value, path: &str) {
    match value {
        Value::Object(map) => match path.split_once('.') {
            None => {
                map.remove(path);
            }
            Some((head, rest)) => {
                if let Some(child) = map.get_mut(head) {
                    remove_path(child, rest);
                }
            }
        },
        Value::Array(items) => {
            for item in items.iter_mut() {
                remove_path(item, path);
            }
        }
        _ => {}
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
        Value::Bool(_) => 8,
    }
}

/// Total order across JSON values, following the document-store type order
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ord = compare_values(left, right);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((ka, va), (kb, vb)) in x.iter().zip(y.iter()) {
                let ord = ka.cmp(kb).then_with(|| compare_values(va, vb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// Same comparison class, so range operators apply
pub(crate) fn comparable(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b)
}

pub(crate) fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(_) => true,
    }
}

pub(crate) fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_path_traverses_arrays() {
        let doc = json!({ "pivot": [{ "roleId": "a" }, { "roleId": "b" }, { "other": 1 }] });
        assert_eq!(get_path(&doc, "pivot.roleId"), Some(json!(["a", "b"])));
        assert_eq!(get_path(&doc, "missing"), None);
    }

    #[test]
    fn join_values_treat_missing_as_null() {
        let doc = json!({ "a": 1 });
        assert_eq!(join_values(&doc, "b"), vec![Value::Null]);
        assert_eq!(join_values(&json!({ "a": [] }), "a"), Vec::<Value>::new());
    }

    #[test]
    fn set_and_remove_nested_paths() {
        let mut map = Map::new();
        set_path(&mut map, "a.b", json!(1));
        let mut doc = Value::Object(map);
        assert_eq!(doc, json!({ "a": { "b": 1 } }));

        remove_path(&mut doc, "a.b");
        assert_eq!(doc, json!({ "a": {} }));
    }

    #[test]
    fn remove_path_descends_into_arrays() {
        let mut doc = json!({ "items": [{ "secret": 1, "keep": 2 }, { "secret": 3 }] });
        remove_path(&mut doc, "items.secret");
        assert_eq!(doc, json!({ "items": [{ "keep": 2 }, {}] }));
    }

    #[test]
    fn ordering_crosses_types() {
        assert_eq!(compare_values(&json!(null), &json!(1)), Ordering::Less);
        assert_eq!(compare_values(&json!(2), &json!(2.0)), Ordering::Equal);
        assert_eq!(compare_values(&json!("a"), &json!(5)), Ordering::Greater);
        assert_eq!(compare_values(&json!(true), &json!("z")), Ordering::Greater);
    }

    #[test]
    fn number_value_prefers_integers() {
        assert_eq!(number_value(3.0), json!(3));
        assert_eq!(number_value(7.5), json!(7.5));
    }
}
