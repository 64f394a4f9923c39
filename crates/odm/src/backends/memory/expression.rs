//! Aggregation expression evaluation (`$expr`, `$project` computed fields,
//! `$replaceRoot`, `$addFields`, `$group` keys and accumulators)

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::values::{compare_values, get_path, truthy, values_equal};
use crate::error::{ModelError, ModelResult};

/// Evaluate an expression against a document; `None` means "missing".
pub(crate) fn eval(expr: &Value, root: &Value) -> ModelResult<Option<Value>> {
    match expr {
        Value::String(s) if s.starts_with("$$") => eval_variable(s, root),
        Value::String(s) if s.starts_with('$') => Ok(get_path(root, &s[1..])),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(item, root)?.unwrap_or(Value::Null));
            }
            Ok(Some(Value::Array(out)))
        }
        Value::Object(map) if map.len() == 1 && map.keys().all(|k| k.starts_with('$')) => {
            match map.iter().next() {
                Some((op, args)) => eval_operator(op, args, root),
                None => Ok(Some(expr.clone())),
            }
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                if let Some(v) = eval(value, root)? {
                    out.insert(key.clone(), v);
                }
            }
            Ok(Some(Value::Object(out)))
        }
        literal => Ok(Some(literal.clone())),
    }
}

fn eval_variable(name: &str, root: &Value) -> ModelResult<Option<Value>> {
    let (var, path) = match name[2..].split_once('.') {
        Some((var, path)) => (var, Some(path)),
        None => (&name[2..], None),
    };

    match var {
        "ROOT" | "CURRENT" => Ok(match path {
            Some(path) => get_path(root, path),
            None => Some(root.clone()),
        }),
        other => Err(ModelError::Query(format!("unknown variable '$${}'", other))),
    }
}

fn args_list(args: &Value) -> Vec<Value> {
    match args {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn eval_args(args: &Value, root: &Value) -> ModelResult<Vec<Option<Value>>> {
    args_list(args).iter().map(|arg| eval(arg, root)).collect()
}

fn binary(op: &str, args: &Value, root: &Value) -> ModelResult<(Value, Value)> {
    let values = eval_args(args, root)?;
    if values.len() != 2 {
        return Err(ModelError::Query(format!("{} expects exactly two arguments", op)));
    }
    let mut values = values.into_iter().map(|v| v.unwrap_or(Value::Null));
    let left = values.next().unwrap_or(Value::Null);
    let right = values.next().unwrap_or(Value::Null);
    Ok((left, right))
}

fn eval_operator(op: &str, args: &Value, root: &Value) -> ModelResult<Option<Value>> {
    let result = match op {
        "$literal" => args.clone(),
        "$and" => {
            let mut all = true;
            for arg in args_list(args) {
                if !truthy(eval(&arg, root)?.as_ref()) {
                    all = false;
                    break;
                }
            }
            Value::Bool(all)
        }
        "$or" => {
            let mut any = false;
            for arg in args_list(args) {
                if truthy(eval(&arg, root)?.as_ref()) {
                    any = true;
                    break;
                }
            }
            Value::Bool(any)
        }
        "$not" => {
            let values = eval_args(args, root)?;
            Value::Bool(!truthy(values.first().and_then(|v| v.as_ref())))
        }
        "$eq" => {
            let (l, r) = binary(op, args, root)?;
            Value::Bool(values_equal(&l, &r))
        }
        "$ne" => {
            let (l, r) = binary(op, args, root)?;
            Value::Bool(!values_equal(&l, &r))
        }
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let (l, r) = binary(op, args, root)?;
            let ord = compare_values(&l, &r);
            Value::Bool(match op {
                "$gt" => ord == Ordering::Greater,
                "$gte" => ord != Ordering::Less,
                "$lt" => ord == Ordering::Less,
                _ => ord != Ordering::Greater,
            })
        }
        "$in" => {
            let (needle, haystack) = binary(op, args, root)?;
            match haystack {
                Value::Array(items) => Value::Bool(items.iter().any(|v| values_equal(v, &needle))),
                _ => return Err(ModelError::Query("$in requires an array".to_string())),
            }
        }
        "$toLower" | "$toUpper" => {
            let value = eval_args(args, root)?.into_iter().next().flatten();
            let text = match value {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
            };
            Value::String(if op == "$toLower" {
                text.to_lowercase()
            } else {
                text.to_uppercase()
            })
        }
        "$ifNull" => {
            let values = eval_args(args, root)?;
            values
                .into_iter()
                .flatten()
                .find(|v| !v.is_null())
                .unwrap_or(Value::Null)
        }
        "$size" => match eval_args(args, root)?.into_iter().next().flatten() {
            Some(Value::Array(items)) => Value::from(items.len()),
            _ => return Err(ModelError::Query("$size requires an array".to_string())),
        },
        "$mergeObjects" => {
            let mut merged = Map::new();
            for value in eval_args(args, root)?.into_iter().flatten() {
                match value {
                    Value::Object(map) => merged.extend(map),
                    Value::Null => {}
                    other => {
                        return Err(ModelError::Query(format!(
                            "$mergeObjects requires objects, got {}",
                            other
                        )))
                    }
                }
            }
            Value::Object(merged)
        }
        other => {
            return Err(ModelError::Query(format!(
                "unsupported expression operator '{}'",
                other
            )))
        }
    };
    Ok(Some(result))
}
