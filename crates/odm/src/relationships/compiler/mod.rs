//! Pipeline Compilers - relationship descriptors to aggregation stages
//!
//! Every relationship kind compiles through the same three steps:
//!
//! 1. the related collection's sub-pipeline: soft-delete and discriminator
//!    match, then the options' sort/skip/limit, then the nested eager loads
//!    of this relation compiled recursively against the related model;
//! 2. the kind-specific join stages wrapping that sub-pipeline, looked up in
//!    a dispatch table keyed by [`RelationshipType`];
//! 3. the projection policy for the relation alias.
//!
//! Compilation is pure: the same descriptor and tree always produce the same
//! stages, and nothing is read from the store.

mod belongs_to;
mod belongs_to_many;
mod has_many;
mod has_many_through;
mod has_one;
mod morph;

pub(crate) use belongs_to_many::pivot_conditions;

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use super::eager_loading::{EagerAlias, EagerLoad};
use super::metadata::{RelationDescriptor, RelationKeys, RelationshipType};
use crate::error::{ModelError, ModelResult};
use crate::model::ModelMeta;
use crate::query::Stage;
use crate::soft_delete::SoftDeletePolicy;

/// Join stages for one kind, given the related collection's sub-pipeline
type CompileFn = fn(&RelationDescriptor, Vec<Stage>) -> ModelResult<Vec<Stage>>;

const COMPILERS: &[(RelationshipType, CompileFn)] = &[
    (RelationshipType::HasOne, has_one::compile),
    (RelationshipType::BelongsTo, belongs_to::compile),
    (RelationshipType::HasMany, has_many::compile),
    (RelationshipType::BelongsToMany, belongs_to_many::compile),
    (RelationshipType::HasManyThrough, has_many_through::compile),
    (RelationshipType::MorphTo, morph::compile_morph_to),
    (RelationshipType::MorphMany, morph::compile_morph_many),
    (RelationshipType::MorphToMany, morph::compile_morph_to_many),
    (RelationshipType::MorphedByMany, morph::compile_morphed_by_many),
];

/// Stages of a whole eager-load tree and the alias tree they produce
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledEager {
    pub stages: Vec<Stage>,
    pub aliases: Vec<EagerAlias>,
}

/// Stages of one relation
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRelation {
    pub stages: Vec<Stage>,
    pub alias: EagerAlias,
}

fn compiler_for(kind: RelationshipType) -> ModelResult<CompileFn> {
    COMPILERS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, f)| *f)
        .ok_or_else(|| ModelError::Query(format!("no pipeline compiler for {}", kind)))
}

/// Compile an eager-load tree requested on a query of `owner`
pub fn compile_eager(owner: &ModelMeta, tree: &[EagerLoad]) -> ModelResult<CompiledEager> {
    let mut compiled = CompiledEager::default();
    let mut seen: HashMap<String, String> = HashMap::new();

    for node in tree {
        let mut descriptor = owner.resolve(&node.name)?;
        if let Some(options) = &node.options {
            descriptor.options = descriptor.options.merged_with(options);
        }

        let alias = descriptor.alias().to_string();
        if let Some(previous) = seen.insert(alias.clone(), node.name.clone()) {
            return Err(ModelError::Query(format!(
                "relations '{}' and '{}' of '{}' both load into '{}'",
                previous, node.name, owner.type_name, alias
            )));
        }

        let relation = compile(&descriptor, &node.children)?;
        tracing::debug!(
            model = owner.type_name,
            relation = %node.name,
            kind = %descriptor.kind,
            stages = relation.stages.len(),
            "compiled eager load"
        );
        compiled.stages.extend(relation.stages);
        compiled.aliases.push(relation.alias);
    }
    Ok(compiled)
}

/// Compile one relation with the nested loads requested under it
pub fn compile(descriptor: &RelationDescriptor, nested: &[EagerLoad]) -> ModelResult<CompiledRelation> {
    descriptor.validate()?;
    let (sub_pipeline, children) = related_pipeline(descriptor, nested)?;
    let join = compiler_for(descriptor.kind)?;

    let mut stages = join(descriptor, sub_pipeline)?;
    stages.extend(projection_stages(descriptor, &children));

    Ok(CompiledRelation {
        stages,
        alias: EagerAlias {
            alias: descriptor.alias().to_string(),
            single: descriptor.kind.is_single(),
            children,
        },
    })
}

/// `{ $eq: ["$field", value] }`
pub(crate) fn field_equals(field: &str, value: Value) -> Value {
    json!({ "$eq": [format!("${}", field), value] })
}

/// Discriminator condition on the related side of morphTo / morphMany
fn related_type_condition(descriptor: &RelationDescriptor) -> Option<Value> {
    match (&descriptor.keys, descriptor.kind) {
        (
            RelationKeys::Morph { type_field, .. },
            RelationshipType::MorphTo | RelationshipType::MorphMany,
        ) => Some(field_equals(type_field, Value::String(descriptor.owner.type_name.to_string()))),
        _ => None,
    }
}

/// The related collection's sub-pipeline and the alias tree of its nested loads
fn related_pipeline(
    descriptor: &RelationDescriptor,
    nested: &[EagerLoad],
) -> ModelResult<(Vec<Stage>, Vec<EagerAlias>)> {
    let mut stages = Vec::new();

    let conditions: Vec<Value> = related_type_condition(descriptor)
        .into_iter()
        .chain(SoftDeletePolicy::for_meta(&descriptor.related, descriptor.trashed()).expr_condition())
        .collect();
    if !conditions.is_empty() {
        stages.push(Stage::match_expr(conditions));
    }

    let options = &descriptor.options;
    if let Some((column, direction)) = &options.sort {
        stages.push(Stage::sort(vec![(column.clone(), direction.as_i32())]));
    }
    if let Some(n) = options.skip {
        stages.push(Stage::skip(n));
    }
    if let Some(n) = options.limit {
        stages.push(Stage::limit(n));
    }

    let children = compile_eager(&descriptor.related, nested)?;
    stages.extend(children.stages);
    Ok((stages, children.aliases))
}

/// Sub-pipeline of a pivot or intermediate collection: soft-delete and
/// discriminator conditions only
pub(crate) fn intermediate_pipeline(conditions: Vec<Value>) -> Vec<Stage> {
    if conditions.is_empty() {
        Vec::new()
    } else {
        vec![Stage::match_expr(conditions)]
    }
}

/// Visibility projection for the relation alias
fn projection_stages(descriptor: &RelationDescriptor, children: &[EagerAlias]) -> Vec<Stage> {
    let alias = descriptor.alias();
    let options = &descriptor.options;

    if let Some(fields) = &options.select {
        let mut spec = Map::new();
        spec.insert("_document".to_string(), Value::String("$$ROOT".to_string()));
        for field in fields
            .iter()
            .map(String::as_str)
            .chain(children.iter().map(|c| c.alias.as_str()))
        {
            spec.insert(format!("{}.{}", alias, field), Value::from(1));
        }
        let mut flattened = Map::new();
        flattened.insert(alias.to_string(), Value::String(format!("${}", alias)));
        return vec![
            Stage::project(spec),
            Stage::replace_root(json!({ "$mergeObjects": ["$_document", flattened] })),
        ];
    }

    let hidden = options.hidden_fields(descriptor.related.hidden);
    if hidden.is_empty() {
        Vec::new()
    } else {
        vec![Stage::exclude(hidden.iter().map(|field| format!("{}.{}", alias, field)))]
    }
}

/// Name of the temporary field holding pivot or intermediate documents
pub(crate) fn intermediate_alias(descriptor: &RelationDescriptor, suffix: &str) -> String {
    format!("{}_{}", descriptor.alias(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_compiler() {
        for kind in RelationshipType::ALL {
            assert!(compiler_for(kind).is_ok(), "missing compiler for {}", kind);
        }
    }

    #[test]
    fn field_equals_builds_expr() {
        assert_eq!(
            field_equals("imageableType", json!("Post")),
            json!({ "$eq": ["$imageableType", "Post"] })
        );
    }

    #[test]
    fn empty_intermediate_conditions_emit_no_stage() {
        assert!(intermediate_pipeline(Vec::new()).is_empty());
        assert_eq!(intermediate_pipeline(vec![json!(true)]).len(), 1);
    }
}
