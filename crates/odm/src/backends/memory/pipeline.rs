//! Aggregation pipeline execution over in-memory collections

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Value};

use super::expression::eval;
use super::matcher::matches;
use super::values::{
    compare_values, get_path, join_values, number_value, remove_path, set_path, values_equal,
};
use crate::backends::Document;
use crate::error::{ModelError, ModelResult};

/// Executes pipelines with read access to every collection, so `$lookup`
/// stages can reach across collections.
pub(crate) struct PipelineExecutor<'a> {
    collections: &'a HashMap<String, Vec<Document>>,
}

impl<'a> PipelineExecutor<'a> {
    pub(crate) fn new(collections: &'a HashMap<String, Vec<Document>>) -> Self {
        Self { collections }
    }

    /// Run `stages` over the documents of `collection`
    pub(crate) fn run_on(&self, collection: &str, stages: &[Value]) -> ModelResult<Vec<Document>> {
        let docs = self.load(collection);
        let results = self.run(docs, stages)?;
        results
            .into_iter()
            .map(|doc| match doc {
                Value::Object(map) => Ok(map),
                other => Err(ModelError::Query(format!(
                    "pipeline produced a non-document value: {}",
                    other
                ))),
            })
            .collect()
    }

    fn load(&self, collection: &str) -> Vec<Value> {
        self.collections
            .get(collection)
            .map(|docs| docs.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    pub(crate) fn run(&self, mut docs: Vec<Value>, stages: &[Value]) -> ModelResult<Vec<Value>> {
        for stage in stages {
            let (op, body) = stage_parts(stage)?;
            docs = match op {
                "$match" => self.exec_match(docs, body)?,
                "$lookup" => self.exec_lookup(docs, body)?,
                "$unwind" => exec_unwind(docs, body)?,
                "$project" => exec_project(docs, body)?,
                "$replaceRoot" => exec_replace_root(docs, body)?,
                "$addFields" | "$set" => exec_add_fields(docs, body)?,
                "$sort" => exec_sort(docs, body)?,
                "$skip" => {
                    let n = as_count(op, body)?;
                    docs.into_iter().skip(n).collect()
                }
                "$limit" => {
                    let n = as_count(op, body)?;
                    docs.into_iter().take(n).collect()
                }
                "$count" => exec_count(docs, body)?,
                "$group" => exec_group(docs, body)?,
                other => {
                    return Err(ModelError::Query(format!(
                        "unsupported pipeline stage '{}'",
                        other
                    )))
                }
            };
        }
        Ok(docs)
    }

    fn exec_match(&self, docs: Vec<Value>, filter: &Value) -> ModelResult<Vec<Value>> {
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            if matches(&doc, filter)? {
                out.push(doc);
            }
        }
        Ok(out)
    }

    fn exec_lookup(&self, docs: Vec<Value>, body: &Value) -> ModelResult<Vec<Value>> {
        let from = required_str(body, "from", "$lookup")?;
        let alias = required_str(body, "as", "$lookup")?;
        let local_field = body.get("localField").and_then(Value::as_str);
        let foreign_field = body.get("foreignField").and_then(Value::as_str);
        let sub_pipeline = match body.get("pipeline") {
            Some(Value::Array(stages)) => Some(stages.as_slice()),
            Some(_) => return Err(ModelError::Query("$lookup pipeline must be an array".to_string())),
            None => None,
        };
        if local_field.is_some() != foreign_field.is_some() {
            return Err(ModelError::Query(
                "$lookup requires both localField and foreignField".to_string(),
            ));
        }

        let foreign = self.load(from);
        let mut out = Vec::with_capacity(docs.len());

        for mut doc in docs {
            let joined: Vec<Value> = match (local_field, foreign_field) {
                (Some(local), Some(foreign_key)) => {
                    let locals = join_values(&doc, local);
                    foreign
                        .iter()
                        .filter(|candidate| {
                            join_values(candidate, foreign_key)
                                .iter()
                                .any(|fv| locals.iter().any(|lv| values_equal(lv, fv)))
                        })
                        .cloned()
                        .collect()
                }
                _ => foreign.clone(),
            };

            let joined = match sub_pipeline {
                Some(stages) => self.run(joined, stages)?,
                None => joined,
            };

            if let Value::Object(map) = &mut doc {
                set_path(map, alias, Value::Array(joined));
            }
            out.push(doc);
        }
        Ok(out)
    }
}

fn stage_parts(stage: &Value) -> ModelResult<(&str, &Value)> {
    match stage {
        Value::Object(map) if map.len() == 1 => {
            let (op, body) = map
                .iter()
                .next()
                .ok_or_else(|| ModelError::Query("empty stage".to_string()))?;
            Ok((op.as_str(), body))
        }
        other => Err(ModelError::Query(format!(
            "a stage must be a single-key object, got {}",
            other
        ))),
    }
}

fn required_str<'v>(body: &'v Value, key: &str, stage: &str) -> ModelResult<&'v str> {
    body.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ModelError::Query(format!("{} requires '{}'", stage, key)))
}

fn as_count(op: &str, body: &Value) -> ModelResult<usize> {
    body.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| ModelError::Query(format!("{} requires a non-negative integer", op)))
}

fn exec_unwind(docs: Vec<Value>, body: &Value) -> ModelResult<Vec<Value>> {
    let (path, preserve) = match body {
        Value::String(path) => (path.as_str(), false),
        Value::Object(_) => (
            required_str(body, "path", "$unwind")?,
            body.get("preserveNullAndEmptyArrays")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        ),
        _ => return Err(ModelError::Query("invalid $unwind".to_string())),
    };
    let field = path
        .strip_prefix('$')
        .ok_or_else(|| ModelError::Query("$unwind path must start with '$'".to_string()))?;

    let mut out = Vec::new();
    for doc in docs {
        match get_path(&doc, field) {
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = doc.clone();
                    if let Value::Object(map) = &mut copy {
                        set_path(map, field, item);
                    }
                    out.push(copy);
                }
            }
            Some(Value::Array(_)) => {
                if preserve {
                    let mut copy = doc;
                    remove_path(&mut copy, field);
                    out.push(copy);
                }
            }
            None | Some(Value::Null) => {
                if preserve {
                    out.push(doc);
                }
            }
            Some(_) => out.push(doc),
        }
    }
    Ok(out)
}

enum Include {
    Leaf,
    Computed(Value),
    Branch(Vec<(String, Include)>),
}

fn insert_include(tree: &mut Vec<(String, Include)>, path: &str, leaf: Include) {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let position = tree.iter().position(|(key, _)| key == head);
    match rest {
        None => match position {
            Some(idx) => tree[idx].1 = leaf,
            None => tree.push((head.to_string(), leaf)),
        },
        Some(rest) => {
            let idx = match position {
                Some(idx) => idx,
                None => {
                    tree.push((head.to_string(), Include::Branch(Vec::new())));
                    tree.len() - 1
                }
            };
            if !matches!(tree[idx].1, Include::Branch(_)) {
                tree[idx].1 = Include::Branch(Vec::new());
            }
            if let Include::Branch(children) = &mut tree[idx].1 {
                insert_include(children, rest, leaf);
            }
        }
    }
}

fn apply_include(source: &Map<String, Value>, tree: &[(String, Include)], root: &Value) -> ModelResult<Map<String, Value>> {
    let mut out = Map::new();
    for (key, node) in tree {
        match node {
            Include::Leaf => {
                if let Some(v) = source.get(key) {
                    out.insert(key.clone(), v.clone());
                }
            }
            Include::Computed(expr) => {
                if let Some(v) = eval(expr, root)? {
                    out.insert(key.clone(), v);
                }
            }
            Include::Branch(children) => match source.get(key) {
                Some(Value::Object(child)) => {
                    out.insert(key.clone(), Value::Object(apply_include(child, children, root)?));
                }
                Some(Value::Array(items)) => {
                    let mut projected = Vec::new();
                    for item in items {
                        if let Value::Object(child) = item {
                            projected.push(Value::Object(apply_include(child, children, root)?));
                        }
                    }
                    out.insert(key.clone(), Value::Array(projected));
                }
                _ => {}
            },
        }
    }
    Ok(out)
}

fn is_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

fn exec_project(docs: Vec<Value>, body: &Value) -> ModelResult<Vec<Value>> {
    let spec = body
        .as_object()
        .ok_or_else(|| ModelError::Query("$project requires an object".to_string()))?;

    let exclusion = spec
        .iter()
        .filter(|(key, _)| key.as_str() != "_id")
        .all(|(_, v)| is_flag(v) == Some(false))
        && !spec.is_empty();
    let id_excluded = spec.get("_id").and_then(is_flag) == Some(false);

    if exclusion {
        return Ok(docs
            .into_iter()
            .map(|mut doc| {
                for key in spec.keys() {
                    remove_path(&mut doc, key);
                }
                doc
            })
            .collect());
    }

    let mut tree = Vec::new();
    if !id_excluded && !spec.contains_key("_id") {
        insert_include(&mut tree, "_id", Include::Leaf);
    }
    for (key, value) in spec {
        match is_flag(value) {
            Some(true) => insert_include(&mut tree, key, Include::Leaf),
            Some(false) if key == "_id" => {}
            Some(false) => {
                return Err(ModelError::Query(format!(
                    "cannot exclude '{}' in an inclusion projection",
                    key
                )))
            }
            None => insert_include(&mut tree, key, Include::Computed(value.clone())),
        }
    }

    docs.into_iter()
        .map(|doc| {
            let source = doc.as_object().cloned().unwrap_or_default();
            apply_include(&source, &tree, &doc).map(Value::Object)
        })
        .collect()
}

fn exec_replace_root(docs: Vec<Value>, body: &Value) -> ModelResult<Vec<Value>> {
    let expr = body
        .get("newRoot")
        .ok_or_else(|| ModelError::Query("$replaceRoot requires 'newRoot'".to_string()))?;
    docs.into_iter()
        .map(|doc| match eval(expr, &doc)? {
            Some(Value::Object(map)) => Ok(Value::Object(map)),
            other => Err(ModelError::Query(format!(
                "$replaceRoot newRoot must be a document, got {:?}",
                other
            ))),
        })
        .collect()
}

fn exec_add_fields(docs: Vec<Value>, body: &Value) -> ModelResult<Vec<Value>> {
    let spec = body
        .as_object()
        .ok_or_else(|| ModelError::Query("$addFields requires an object".to_string()))?;
    docs.into_iter()
        .map(|mut doc| {
            let mut computed = Vec::with_capacity(spec.len());
            for (key, expr) in spec {
                computed.push((key, eval(expr, &doc)?));
            }
            if let Value::Object(map) = &mut doc {
                for (key, value) in computed {
                    if let Some(value) = value {
                        set_path(map, key, value);
                    }
                }
            }
            Ok(doc)
        })
        .collect()
}

fn exec_sort(mut docs: Vec<Value>, body: &Value) -> ModelResult<Vec<Value>> {
    let spec = body
        .as_object()
        .ok_or_else(|| ModelError::Query("$sort requires an object".to_string()))?;
    let mut keys = Vec::with_capacity(spec.len());
    for (field, direction) in spec {
        let descending = match direction.as_i64() {
            Some(1) => false,
            Some(-1) => true,
            _ => return Err(ModelError::Query(format!("invalid sort direction for '{}'", field))),
        };
        keys.push((field.clone(), descending));
    }

    docs.sort_by(|a, b| {
        for (field, descending) in &keys {
            let left = get_path(a, field).unwrap_or(Value::Null);
            let right = get_path(b, field).unwrap_or(Value::Null);
            let ord = compare_values(&left, &right);
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(docs)
}

fn exec_count(docs: Vec<Value>, body: &Value) -> ModelResult<Vec<Value>> {
    let field = body
        .as_str()
        .ok_or_else(|| ModelError::Query("$count requires a field name".to_string()))?;
    if docs.is_empty() {
        return Ok(Vec::new());
    }
    let mut map = Map::new();
    map.insert(field.to_string(), Value::from(docs.len()));
    Ok(vec![Value::Object(map)])
}

enum Accumulator {
    Sum(f64),
    Avg { sum: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Value>),
    Last(Option<Value>),
    Push(Vec<Value>),
}

impl Accumulator {
    fn new(op: &str) -> ModelResult<Self> {
        Ok(match op {
            "$sum" | "$count" => Accumulator::Sum(0.0),
            "$avg" => Accumulator::Avg { sum: 0.0, count: 0 },
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(None),
            "$push" => Accumulator::Push(Vec::new()),
            other => return Err(ModelError::Query(format!("unsupported accumulator '{}'", other))),
        })
    }

    fn feed(&mut self, value: Option<Value>) {
        match self {
            Accumulator::Sum(total) => {
                if let Some(n) = value.as_ref().and_then(Value::as_f64) {
                    *total += n;
                }
            }
            Accumulator::Avg { sum, count } => {
                if let Some(n) = value.as_ref().and_then(Value::as_f64) {
                    *sum += n;
                    *count += 1;
                }
            }
            Accumulator::Min(current) => keep_extreme(current, value, Ordering::Less),
            Accumulator::Max(current) => keep_extreme(current, value, Ordering::Greater),
            Accumulator::First(first) => {
                if first.is_none() {
                    *first = Some(value.unwrap_or(Value::Null));
                }
            }
            Accumulator::Last(last) => *last = Some(value.unwrap_or(Value::Null)),
            Accumulator::Push(items) => items.push(value.unwrap_or(Value::Null)),
        }
    }

    fn finish(self) -> Value {
        match self {
            Accumulator::Sum(total) => number_value(total),
            Accumulator::Avg { sum, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    number_value(sum / count as f64)
                }
            }
            Accumulator::Min(v) | Accumulator::Max(v) | Accumulator::First(v) | Accumulator::Last(v) => {
                v.unwrap_or(Value::Null)
            }
            Accumulator::Push(items) => Value::Array(items),
        }
    }
}

fn keep_extreme(current: &mut Option<Value>, value: Option<Value>, wanted: Ordering) {
    let Some(v) = value.filter(|v| !v.is_null()) else {
        return;
    };
    let replace = current
        .as_ref()
        .map(|c| compare_values(&v, c) == wanted)
        .unwrap_or(true);
    if replace {
        *current = Some(v);
    }
}

fn exec_group(docs: Vec<Value>, body: &Value) -> ModelResult<Vec<Value>> {
    let spec = body
        .as_object()
        .ok_or_else(|| ModelError::Query("$group requires an object".to_string()))?;
    let key_expr = spec
        .get("_id")
        .ok_or_else(|| ModelError::Query("$group requires an '_id'".to_string()))?;

    let mut fields = Vec::new();
    for (name, acc) in spec.iter().filter(|(name, _)| name.as_str() != "_id") {
        let (op, arg) = stage_parts(acc)?;
        fields.push((name.clone(), op.to_string(), arg.clone()));
    }

    let mut groups: Vec<(Value, Vec<Accumulator>)> = Vec::new();
    for doc in &docs {
        let key = eval(key_expr, doc)?.unwrap_or(Value::Null);
        let idx = match groups.iter().position(|(k, _)| values_equal(k, &key)) {
            Some(idx) => idx,
            None => {
                let accs = fields
                    .iter()
                    .map(|(_, op, _)| Accumulator::new(op))
                    .collect::<ModelResult<Vec<_>>>()?;
                groups.push((key, accs));
                groups.len() - 1
            }
        };
        for ((_, op, arg), acc) in fields.iter().zip(groups[idx].1.iter_mut()) {
            let value = if op == "$count" {
                Some(Value::from(1))
            } else {
                eval(arg, doc)?
            };
            acc.feed(value);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accs)| {
            let mut map = Map::new();
            map.insert("_id".to_string(), key);
            for ((name, _, _), acc) in fields.iter().zip(accs) {
                map.insert(name.clone(), acc.finish());
            }
            Value::Object(map)
        })
        .collect())
}
