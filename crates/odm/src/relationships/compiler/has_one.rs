//! hasOne: single `$lookup` on the related foreign key, unwound to one document

use crate::error::{ModelError, ModelResult};
use crate::query::{Lookup, Stage};
use crate::relationships::metadata::{RelationDescriptor, RelationKeys};

pub(super) fn compile(descriptor: &RelationDescriptor, related: Vec<Stage>) -> ModelResult<Vec<Stage>> {
    let mut stages = owning_lookup(descriptor, related)?;
    stages.push(Stage::unwind(descriptor.alias()));
    Ok(stages)
}

/// `$lookup` matching `related[foreign_key]` against `owner[local_key]`;
/// shared with hasMany
pub(super) fn owning_lookup(descriptor: &RelationDescriptor, related: Vec<Stage>) -> ModelResult<Vec<Stage>> {
    let RelationKeys::Owning { foreign_key, local_key } = &descriptor.keys else {
        return Err(ModelError::Query(format!(
            "'{}' is not an owning relation",
            descriptor.name
        )));
    };
    Ok(vec![Stage::lookup(Lookup {
        from: descriptor.related.collection.to_string(),
        local_field: local_key.clone(),
        foreign_field: foreign_key.clone(),
        alias: descriptor.alias().to_string(),
        pipeline: related,
    })])
}
