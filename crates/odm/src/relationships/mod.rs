//! Relationships - declarative relations between document models
//!
//! Relations are declared per model in a [`RelationRegistry`], described by
//! [`RelationDescriptor`] values and resolved either eagerly, compiled into
//! `$lookup` stages of the parent query, or lazily through a
//! [`RelationQuery`]. Many-to-many kinds additionally expose the pivot
//! reconciliation operations.

pub mod compiler;
pub mod eager_loading;
pub mod factories;
pub mod metadata;
pub mod pivot;
pub mod query;
pub mod registry;
pub mod writes;

pub use compiler::{compile, compile_eager, CompiledEager, CompiledRelation};
pub use eager_loading::{parse_map, parse_path, EagerAlias, EagerLoad};
pub use metadata::{
    PivotKeys, PivotSoftDelete, RelationDescriptor, RelationKeys, RelationOptions, RelationshipType,
};
pub use pivot::{PivotChanges, PivotPlan, PivotReconciler, PivotSnapshot};
pub use query::kinds::{OwningKind, PivotKind, RelationKind};
pub use query::{
    BelongsTo, BelongsToMany, HasMany, HasManyThrough, HasOne, MorphMany, MorphTo, MorphToMany,
    MorphedByMany, RelationQuery,
};
pub use registry::{registry_for, resolve_relation, IntoDescriptor, RelationRegistry};
