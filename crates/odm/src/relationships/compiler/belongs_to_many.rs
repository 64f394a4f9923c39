//! belongsToMany: owner -> pivot -> related, then the pivot field is dropped
//!
//! The second `$lookup` joins on the array of pivot references, so the
//! related sub-pipeline (sort/skip/limit included) runs once over the whole
//! related set rather than once per pivot row.

use serde_json::Value;

use super::{field_equals, intermediate_alias, intermediate_pipeline};

use crate::error::{ModelError, ModelResult};
use crate::query::{Lookup, Stage};
use crate::relationships::metadata::{PivotKeys, RelationDescriptor};

pub(super) fn compile(descriptor: &RelationDescriptor, related: Vec<Stage>) -> ModelResult<Vec<Stage>> {
    pivot_join(descriptor, related)
}

/// Conditions every visible pivot row satisfies: the discriminator of a
/// polymorphic pivot and the pivot's own soft-delete marker
pub(crate) fn pivot_conditions(pivot: &PivotKeys) -> Vec<Value> {
    let mut conditions = Vec::new();
    if let Some((type_field, type_name)) = &pivot.morph_type {
        conditions.push(field_equals(type_field, Value::String(type_name.clone())));
    }
    if let Some(soft) = &pivot.soft_delete {
        conditions.push(field_equals(&soft.field, Value::Bool(false)));
    }
    conditions
}

/// Two chained lookups through the pivot collection; shared with the
/// polymorphic many-to-many kinds
pub(super) fn pivot_join(descriptor: &RelationDescriptor, related: Vec<Stage>) -> ModelResult<Vec<Stage>> {
    let pivot = descriptor.pivot().ok_or_else(|| {
        ModelError::Query(format!("'{}' has no pivot collection", descriptor.name))
    })?;
    let pivot_alias = intermediate_alias(descriptor, "pivot");

    Ok(vec![
        Stage::lookup(Lookup {
            from: pivot.collection.clone(),
            local_field: pivot.parent_key.clone(),
            foreign_field: pivot.foreign_pivot_key.clone(),
            alias: pivot_alias.clone(),
            pipeline: intermediate_pipeline(pivot_conditions(pivot)),
        }),
        Stage::lookup(Lookup {
            from: descriptor.related.collection.to_string(),
            local_field: format!("{}.{}", pivot_alias, pivot.related_pivot_key),
            foreign_field: pivot.related_key.clone(),
            alias: descriptor.alias().to_string(),
            pipeline: related,
        }),
        Stage::exclude([pivot_alias]),
    ])
}
