//! hasManyThrough: owner -> intermediate -> related, intermediate dropped

use super::{intermediate_alias, intermediate_pipeline};

use crate::error::{ModelError, ModelResult};
use crate::query::{Lookup, Stage};
use crate::relationships::metadata::{RelationDescriptor, RelationKeys};
use crate::soft_delete::{SoftDeletePolicy, TrashedMode};

pub(super) fn compile(descriptor: &RelationDescriptor, related: Vec<Stage>) -> ModelResult<Vec<Stage>> {
    let (
        RelationKeys::Through {
            first_key,
            second_key,
            local_key,
            second_local_key,
        },
        Some(through),
    ) = (&descriptor.keys, &descriptor.through)
    else {
        return Err(ModelError::Query(format!(
            "'{}' is missing its intermediate model",
            descriptor.name
        )));
    };
    let through_alias = intermediate_alias(descriptor, "through");
    let through_conditions = SoftDeletePolicy::for_meta(through, TrashedMode::Default)
        .expr_condition()
        .into_iter()
        .collect();

    Ok(vec![
        Stage::lookup(Lookup {
            from: through.collection.to_string(),
            local_field: local_key.clone(),
            foreign_field: first_key.clone(),
            alias: through_alias.clone(),
            pipeline: intermediate_pipeline(through_conditions),
        }),
        Stage::lookup(Lookup {
            from: descriptor.related.collection.to_string(),
            local_field: format!("{}.{}", through_alias, second_local_key),
            foreign_field: second_key.clone(),
            alias: descriptor.alias().to_string(),
            pipeline: related,
        }),
        Stage::exclude([through_alias]),
    ])
}
