//! Model System - document models and their entities
//!
//! - `core_trait`: the Model trait and its runtime metadata snapshot
//! - `primary_key`: document identifiers and their accepted forms
//! - `entity`: documents with change tracking and loaded relations
//! - `lifecycle`: save, delete, restore and refresh
//! - `crud_operations`: static find/create/destroy entry points
//! - `query_methods`: static query entry points

pub mod core_trait;
pub mod crud_operations;
pub mod entity;
pub(crate) mod lifecycle;
pub mod primary_key;
pub mod query_methods;

pub use core_trait::{foreign_key_for, pivot_collection_for, Model, ModelMeta};
pub use crud_operations::CrudOperations;
pub use entity::Entity;
pub use primary_key::{canonicalize_value, normalize_ids, DocumentId, IntoDocumentId};
pub use query_methods::QueryMethods;
