//! Core Model Trait - static metadata of a document type
//!
//! A model is a marker type describing one collection: its name, the type
//! name stored in polymorphic discriminators, soft-delete and timestamp
//! configuration, hidden fields and declared relationships. Documents of the
//! collection are handled as [`Entity<M>`](crate::model::Entity) values.

use std::fmt;

use crate::config::OdmConfig;
use crate::error::ModelResult;
use crate::relationships::registry::{resolve_relation, RelationRegistry};
use crate::relationships::RelationDescriptor;

/// Core trait for document models
pub trait Model: Send + Sync + Sized + 'static {
    /// Type name, stored as the discriminator of polymorphic relations
    fn type_name() -> &'static str;

    /// Collection name for this model
    fn collection_name() -> &'static str;

    /// Primary key field name
    fn primary_key_name() -> &'static str {
        OdmConfig::global().primary_key.as_str()
    }

    /// Check if this model supports soft deletes
    fn uses_soft_deletes() -> bool {
        false
    }

    /// Boolean soft-delete marker field
    fn soft_delete_field() -> &'static str {
        OdmConfig::global().soft_delete_field.as_str()
    }

    /// Deletion timestamp field, stamped on soft delete
    fn deleted_at_field() -> &'static str {
        OdmConfig::global().deleted_at_field.as_str()
    }

    /// Check if this model uses timestamps
    fn uses_timestamps() -> bool {
        false
    }

    fn created_at_field() -> &'static str {
        OdmConfig::global().created_at_field.as_str()
    }

    fn updated_at_field() -> &'static str {
        OdmConfig::global().updated_at_field.as_str()
    }

    /// Fields left out of serialized output and of eager-loaded relation data
    fn hidden() -> &'static [&'static str] {
        &[]
    }

    /// Declare the model's named relationships
    fn relations(_relations: &mut RelationRegistry<Self>) {}
}

/// Runtime snapshot of a model's static metadata, carried by relation
/// descriptors so relations can be compiled without the concrete type.
#[derive(Clone)]
pub struct ModelMeta {
    pub type_name: &'static str,
    pub collection: &'static str,
    pub primary_key: &'static str,
    /// Soft-delete marker field, `None` when the model does not soft delete
    pub soft_delete_field: Option<&'static str>,
    pub deleted_at_field: Option<&'static str>,
    /// `(created_at, updated_at)` when the model is timestamped
    pub timestamps: Option<(&'static str, &'static str)>,
    pub hidden: &'static [&'static str],
    resolver: fn(&str) -> ModelResult<RelationDescriptor>,
}

impl ModelMeta {
    pub fn of<M: Model>() -> Self {
        Self {
            type_name: M::type_name(),
            collection: M::collection_name(),
            primary_key: M::primary_key_name(),
            soft_delete_field: M::uses_soft_deletes().then(M::soft_delete_field),
            deleted_at_field: M::uses_soft_deletes().then(M::deleted_at_field),
            timestamps: M::uses_timestamps().then(|| (M::created_at_field(), M::updated_at_field())),
            hidden: M::hidden(),
            resolver: resolve_relation::<M>,
        }
    }

    /// Look up a named relation of this model
    pub fn resolve(&self, name: &str) -> ModelResult<RelationDescriptor> {
        (self.resolver)(name)
    }

    pub fn uses_soft_deletes(&self) -> bool {
        self.soft_delete_field.is_some()
    }
}

impl fmt::Debug for ModelMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelMeta")
            .field("type_name", &self.type_name)
            .field("collection", &self.collection)
            .field("soft_delete_field", &self.soft_delete_field)
            .finish()
    }
}

impl PartialEq for ModelMeta {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && self.collection == other.collection
    }
}

/// Default foreign-key name for references to a type: `lowerCamel(type) + "Id"`
pub fn foreign_key_for(type_name: &str) -> String {
    let mut chars = type_name.chars();
    match chars.next() {
        Some(first) => format!("{}{}Id", first.to_lowercase(), chars.as_str()),
        None => "id".to_string(),
    }
}

/// Default pivot collection name: both type names lower-cased, sorted and
/// joined by `_`
pub fn pivot_collection_for(a: &str, b: &str) -> String {
    let mut names = [a.to_lowercase(), b.to_lowercase()];
    names.sort();
    names.join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_key_naming() {
        assert_eq!(foreign_key_for("User"), "userId");
        assert_eq!(foreign_key_for("BlogPost"), "blogPostId");
    }

    #[test]
    fn pivot_naming_is_order_independent() {
        assert_eq!(pivot_collection_for("User", "Role"), "role_user");
        assert_eq!(pivot_collection_for("Role", "User"), "role_user");
    }
}
