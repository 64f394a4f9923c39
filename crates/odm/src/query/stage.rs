//! Aggregation stages
//!
//! A [`Stage`] is an opaque pipeline step. Stages are built through the
//! constructors below, concatenated into pipelines and never mutated after
//! they are emitted.

use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

/// One aggregation pipeline step
#[derive(Debug, Clone, PartialEq)]
pub struct Stage(Value);

/// `$lookup` stage description
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub from: String,
    pub local_field: String,
    pub foreign_field: String,
    pub alias: String,
    pub pipeline: Vec<Stage>,
}

impl Stage {
    /// `$lookup` joining `local_field` to `foreign_field`, with an optional
    /// sub-pipeline run over the joined documents
    pub fn lookup(lookup: Lookup) -> Self {
        let mut body = Map::new();
        body.insert("from".to_string(), Value::String(lookup.from));
        body.insert("localField".to_string(), Value::String(lookup.local_field));
        body.insert("foreignField".to_string(), Value::String(lookup.foreign_field));
        body.insert("as".to_string(), Value::String(lookup.alias));
        if !lookup.pipeline.is_empty() {
            body.insert(
                "pipeline".to_string(),
                Value::Array(lookup.pipeline.into_iter().map(Stage::into_value).collect()),
            );
        }
        Stage(json!({ "$lookup": body }))
    }

    /// `$unwind` of `alias`, keeping documents whose array is empty
    pub fn unwind(alias: &str) -> Self {
        Stage(json!({
            "$unwind": { "path": format!("${}", alias), "preserveNullAndEmptyArrays": true }
        }))
    }

    /// `$match` on a query filter document
    pub fn match_filter(filter: Value) -> Self {
        Stage(json!({ "$match": filter }))
    }

    /// `$match` on `$expr: { $and: [...] }`
    pub fn match_expr(conditions: Vec<Value>) -> Self {
        Stage(json!({ "$match": { "$expr": { "$and": conditions } } }))
    }

    /// `$project` with an explicit specification
    pub fn project(spec: Map<String, Value>) -> Self {
        Stage(json!({ "$project": spec }))
    }

    /// Exclusion `$project` dropping each field
    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec: Map<String, Value> = fields
            .into_iter()
            .map(|f| (f.into(), Value::from(0)))
            .collect();
        Stage::project(spec)
    }

    pub fn replace_root(new_root: Value) -> Self {
        Stage(json!({ "$replaceRoot": { "newRoot": new_root } }))
    }

    pub fn add_fields(fields: Map<String, Value>) -> Self {
        Stage(json!({ "$addFields": fields }))
    }

    /// `$sort`; key order is significant
    pub fn sort(keys: Vec<(String, i32)>) -> Self {
        let spec: Map<String, Value> = keys
            .into_iter()
            .map(|(field, dir)| (field, Value::from(dir)))
            .collect();
        Stage(json!({ "$sort": spec }))
    }

    pub fn skip(n: u64) -> Self {
        Stage(json!({ "$skip": n }))
    }

    pub fn limit(n: u64) -> Self {
        Stage(json!({ "$limit": n }))
    }

    pub fn count(field: &str) -> Self {
        Stage(json!({ "$count": field }))
    }

    pub fn group(spec: Map<String, Value>) -> Self {
        Stage(json!({ "$group": spec }))
    }

    /// Stage operator, e.g. `"$lookup"`
    pub fn operator(&self) -> &str {
        self.0
            .as_object()
            .and_then(|map| map.keys().next())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Body of the stage, e.g. the `$lookup` specification
    pub fn body(&self) -> &Value {
        self.0
            .as_object()
            .and_then(|map| map.values().next())
            .unwrap_or(&Value::Null)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl Serialize for Stage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl From<Stage> for Value {
    fn from(stage: Stage) -> Self {
        stage.0
    }
}

/// Render a pipeline as a JSON array, e.g. for logging
pub fn pipeline_to_value(stages: &[Stage]) -> Value {
    Value::Array(stages.iter().map(|s| s.0.clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_omits_empty_pipeline() {
        let stage = Stage::lookup(Lookup {
            from: "comments".into(),
            local_field: "_id".into(),
            foreign_field: "postId".into(),
            alias: "comments".into(),
            pipeline: Vec::new(),
        });
        assert_eq!(stage.operator(), "$lookup");
        assert!(stage.body().get("pipeline").is_none());
        assert_eq!(stage.body()["foreignField"], json!("postId"));
    }

    #[test]
    fn sort_keeps_key_order() {
        let stage = Stage::sort(vec![("b".into(), -1), ("a".into(), 1)]);
        let keys: Vec<&String> = stage.body().as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn unwind_preserves_empty() {
        assert_eq!(
            Stage::unwind("author").into_value(),
            json!({ "$unwind": { "path": "$author", "preserveNullAndEmptyArrays": true } })
        );
    }
}
