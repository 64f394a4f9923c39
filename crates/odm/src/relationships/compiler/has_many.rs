//! hasMany: the hasOne lookup without unwinding; the alias stays an array

use super::has_one::owning_lookup;

use crate::error::ModelResult;
use crate::query::Stage;
use crate::relationships::metadata::RelationDescriptor;

pub(super) fn compile(descriptor: &RelationDescriptor, related: Vec<Stage>) -> ModelResult<Vec<Stage>> {
    owning_lookup(descriptor, related)
}
