//! # elif-odm: Document Mapper for elif.rs
//!
//! Declarative relationships between document models, resolved either
//! lazily as a constrained follow-up query or eagerly as `$lookup` stages of
//! a single aggregation pipeline, plus pivot reconciliation for the
//! many-to-many kinds.
//!
//! The crate decides *what* to send to the store; a [`DocumentDatabase`]
//! implementation carries it out. [`MemoryDatabase`] evaluates pipelines
//! in process.

pub mod backends;
pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod relationships;
pub mod soft_delete;

#[cfg(test)]
mod tests;

pub use backends::{Document, DocumentCollection, DocumentDatabase, MemoryDatabase, UpdateOutcome};
pub use config::{init_tracing, LogFormat, LoggingConfig, OdmConfig};
pub use error::*;
pub use model::*;
pub use query::*;
pub use relationships::{
    BelongsTo, BelongsToMany, HasMany, HasManyThrough, HasOne, MorphMany, MorphTo, MorphToMany,
    MorphedByMany, PivotChanges, RelationDescriptor, RelationOptions, RelationQuery, RelationRegistry,
    RelationshipType,
};
pub use soft_delete::{SoftDeletePolicy, TrashedMode};

/// Everything needed to declare models and work with them
pub mod prelude {
    pub use crate::backends::{DocumentDatabase, MemoryDatabase};
    pub use crate::error::{ModelError, ModelResult};
    pub use crate::model::{CrudOperations, DocumentId, Entity, Model, QueryMethods};
    pub use crate::query::{QueryBuilder, SortDirection};
    pub use crate::relationships::{RelationOptions, RelationRegistry};
    pub use crate::soft_delete::TrashedMode;
}
