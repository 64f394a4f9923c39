//! Query-filter matching for `$match`, updates and deletes

use std::cmp::Ordering;

use regex::RegexBuilder;
use serde_json::{Map, Value};

use super::expression::eval;
use super::values::{candidates, comparable, compare_values, get_path, truthy, values_equal};
use crate::error::{ModelError, ModelResult};

/// Test a document against a filter document
pub(crate) fn matches(doc: &Value, filter: &Value) -> ModelResult<bool> {
    let Value::Object(filter) = filter else {
        return Err(ModelError::Query(format!("filter must be an object, got {}", filter)));
    };

    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clause_list(key, condition)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clause_list(key, condition)? {
                    if matches(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clause_list(key, condition)? {
                    if matches(doc, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            "$expr" => truthy(eval(condition, doc)?.as_ref()),
            op if op.starts_with('$') => {
                return Err(ModelError::Query(format!("unsupported top-level operator '{}'", op)))
            }
            field => field_matches(doc, field, condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clause_list<'a>(op: &str, value: &'a Value) -> ModelResult<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| ModelError::Query(format!("{} requires an array", op)))
}

fn is_operator_doc(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn field_matches(doc: &Value, field: &str, condition: &Value) -> ModelResult<bool> {
    match condition {
        Value::Object(ops) if is_operator_doc(ops) => {
            for (op, operand) in ops {
                if op == "$options" {
                    continue;
                }
                if !operator_matches(doc, field, op, operand, ops)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        literal => Ok(equals(doc, field, literal)),
    }
}

fn equals(doc: &Value, field: &str, expected: &Value) -> bool {
    match candidates(doc, field) {
        None => expected.is_null(),
        Some(values) => values.iter().any(|v| values_equal(v, expected)),
    }
}

fn member_of(doc: &Value, field: &str, list: &Value) -> ModelResult<bool> {
    let items = list
        .as_array()
        .ok_or_else(|| ModelError::Query("$in/$nin require an array".to_string()))?;
    Ok(items.iter().any(|item| equals(doc, field, item)))
}

fn range(doc: &Value, field: &str, operand: &Value, accept: fn(Ordering) -> bool) -> bool {
    candidates(doc, field)
        .unwrap_or_default()
        .iter()
        .any(|v| comparable(v, operand) && accept(compare_values(v, operand)))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn operator_matches(
    doc: &Value,
    field: &str,
    op: &str,
    operand: &Value,
    siblings: &Map<String, Value>,
) -> ModelResult<bool> {
    let result = match op {
        "$eq" => equals(doc, field, operand),
        "$ne" => !equals(doc, field, operand),
        "$gt" => range(doc, field, operand, |o| o == Ordering::Greater),
        "$gte" => range(doc, field, operand, |o| o != Ordering::Less),
        "$lt" => range(doc, field, operand, |o| o == Ordering::Less),
        "$lte" => range(doc, field, operand, |o| o != Ordering::Greater),
        "$in" => member_of(doc, field, operand)?,
        "$nin" => !member_of(doc, field, operand)?,
        "$exists" => get_path(doc, field).is_some() == truthy(Some(operand)),
        "$type" => {
            let wanted = operand
                .as_str()
                .ok_or_else(|| ModelError::Query("$type requires a type name".to_string()))?;
            candidates(doc, field)
                .unwrap_or_default()
                .iter()
                .any(|v| type_name(v) == wanted)
        }
        "$regex" => {
            let pattern = operand
                .as_str()
                .ok_or_else(|| ModelError::Query("$regex requires a string".to_string()))?;
            let options = siblings.get("$options").and_then(Value::as_str).unwrap_or("");
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(options.contains('i'))
                .multi_line(options.contains('m'))
                .build()
                .map_err(|e| ModelError::Query(format!("invalid $regex '{}': {}", pattern, e)))?;
            candidates(doc, field)
                .unwrap_or_default()
                .iter()
                .filter_map(Value::as_str)
                .any(|s| regex.is_match(s))
        }
        "$not" => match operand {
            Value::Object(inner) => !field_matches(doc, field, &Value::Object(inner.clone()))?,
            _ => return Err(ModelError::Query("$not requires an operator document".to_string())),
        },
        other => return Err(ModelError::Query(format!("unsupported query operator '{}'", other))),
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(doc: Value, filter: Value) -> bool {
        matches(&doc, &filter).unwrap()
    }

    #[test]
    fn equality_and_null_semantics() {
        assert!(check(json!({ "a": 1 }), json!({ "a": 1 })));
        assert!(check(json!({}), json!({ "a": null })));
        assert!(check(json!({ "a": null }), json!({ "a": { "$eq": null } })));
        assert!(!check(json!({ "a": 0 }), json!({ "a": null })));
        assert!(check(json!({ "tags": ["x", "y"] }), json!({ "tags": "y" })));
    }

    #[test]
    fn range_operators_respect_type_brackets() {
        let doc = json!({ "likes": 5 });
        assert!(check(doc.clone(), json!({ "likes": { "$gte": 5, "$lte": 10 } })));
        assert!(!check(doc.clone(), json!({ "likes": { "$gt": "1" } })));
        assert!(!check(json!({}), json!({ "likes": { "$lt": 10 } })));
    }

    #[test]
    fn logical_operators() {
        let doc = json!({ "a": 1, "b": 2 });
        assert!(check(doc.clone(), json!({ "$or": [{ "a": 3 }, { "b": 2 }] })));
        assert!(!check(doc.clone(), json!({ "$and": [{ "a": 1 }, { "b": 3 }] })));
        assert!(check(doc, json!({ "$nor": [{ "a": 2 }] })));
    }

    #[test]
    fn membership_and_existence() {
        let doc = json!({ "status": "active" });
        assert!(check(doc.clone(), json!({ "status": { "$in": ["active", "pending"] } })));
        assert!(check(doc.clone(), json!({ "status": { "$nin": ["banned"] } })));
        assert!(check(doc.clone(), json!({ "deletedAt": { "$exists": false } })));
        assert!(check(json!({}), json!({ "status": { "$in": [null] } })));
    }

    #[test]
    fn regex_with_options() {
        let doc = json!({ "name": "Alice" });
        assert!(check(doc.clone(), json!({ "name": { "$regex": "^ali", "$options": "i" } })));
        assert!(!check(doc, json!({ "name": { "$regex": "^ali" } })));
    }

    #[test]
    fn expr_clause() {
        let doc = json!({ "isDeleted": true });
        assert!(check(doc, json!({ "$expr": { "$eq": ["$isDeleted", true] } })));
    }

    #[test]
    fn numeric_type_filter() {
        assert!(check(json!({ "likes": 5 }), json!({ "likes": { "$type": "number" } })));
        assert!(!check(json!({ "likes": "5" }), json!({ "likes": { "$type": "number" } })));
    }
}
