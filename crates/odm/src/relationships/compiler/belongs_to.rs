//! belongsTo: `$lookup` from the owner's foreign key to the parent's key

use crate::error::{ModelError, ModelResult};
use crate::query::{Lookup, Stage};
use crate::relationships::metadata::{RelationDescriptor, RelationKeys};

pub(super) fn compile(descriptor: &RelationDescriptor, related: Vec<Stage>) -> ModelResult<Vec<Stage>> {
    let RelationKeys::Inverse { foreign_key, owner_key } = &descriptor.keys else {
        return Err(ModelError::Query(format!(
            "'{}' is not an inverse relation",
            descriptor.name
        )));
    };
    Ok(vec![
        Stage::lookup(Lookup {
            from: descriptor.related.collection.to_string(),
            local_field: foreign_key.clone(),
            foreign_field: owner_key.clone(),
            alias: descriptor.alias().to_string(),
            pipeline: related,
        }),
        Stage::unwind(descriptor.alias()),
    ])
}
