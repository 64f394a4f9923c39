//! Polymorphic kinds
//!
//! morphTo and morphMany join on the stored id; the discriminator check
//! lives in the related sub-pipeline. The many-to-many forms reuse the pivot
//! join with the discriminator applied to the pivot rows instead.

use super::belongs_to_many::pivot_join;

use crate::error::{ModelError, ModelResult};
use crate::query::{Lookup, Stage};
use crate::relationships::metadata::{RelationDescriptor, RelationKeys};

fn morph_lookup(descriptor: &RelationDescriptor, related: Vec<Stage>) -> ModelResult<Stage> {
    let RelationKeys::Morph { id_field, local_key, .. } = &descriptor.keys else {
        return Err(ModelError::Query(format!(
            "'{}' is not a polymorphic relation",
            descriptor.name
        )));
    };
    Ok(Stage::lookup(Lookup {
        from: descriptor.related.collection.to_string(),
        local_field: local_key.clone(),
        foreign_field: id_field.clone(),
        alias: descriptor.alias().to_string(),
        pipeline: related,
    }))
}

pub(super) fn compile_morph_to(descriptor: &RelationDescriptor, related: Vec<Stage>) -> ModelResult<Vec<Stage>> {
    Ok(vec![
        morph_lookup(descriptor, related)?,
        Stage::unwind(descriptor.alias()),
    ])
}

pub(super) fn compile_morph_many(descriptor: &RelationDescriptor, related: Vec<Stage>) -> ModelResult<Vec<Stage>> {
    Ok(vec![morph_lookup(descriptor, related)?])
}

pub(super) fn compile_morph_to_many(descriptor: &RelationDescriptor, related: Vec<Stage>) -> ModelResult<Vec<Stage>> {
    pivot_join(descriptor, related)
}

/// Same pivot collection as morphToMany, walked from the related side
pub(super) fn compile_morphed_by_many(descriptor: &RelationDescriptor, related: Vec<Stage>) -> ModelResult<Vec<Stage>> {
    pivot_join(descriptor, related)
}
