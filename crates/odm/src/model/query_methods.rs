//! Query Methods - static query entry points for models

use super::core_trait::Model;
use super::entity::Entity;
use crate::backends::DocumentDatabase;
use crate::error::ModelResult;
use crate::query::{Paginated, QueryBuilder};
use crate::relationships::RelationOptions;

/// Trait providing query operations for model collections
pub trait QueryMethods: Model {
    /// Get a query builder for this model; soft-deleted documents are
    /// excluded unless the builder asks otherwise
    fn query() -> QueryBuilder<Self>
    where
        Self: Sized,
    {
        QueryBuilder::new()
    }

    /// Query eager-loading a relation path
    fn with(path: &str) -> QueryBuilder<Self>
    where
        Self: Sized,
    {
        Self::query().with(path)
    }

    /// Query eager-loading a relation and relations nested under it
    fn with_nested(relation: &str, nested: &[&str]) -> QueryBuilder<Self>
    where
        Self: Sized,
    {
        Self::query().with_nested(relation, nested)
    }

    /// Query eager-loading a relation path with options for its last segment
    fn with_options(path: &str, options: RelationOptions) -> QueryBuilder<Self>
    where
        Self: Sized,
    {
        Self::query().with_options(path, options)
    }

    fn with_trashed() -> QueryBuilder<Self>
    where
        Self: Sized,
    {
        Self::query().with_trashed()
    }

    fn only_trashed() -> QueryBuilder<Self>
    where
        Self: Sized,
    {
        Self::query().only_trashed()
    }

    fn where_eq<T: Into<serde_json::Value>>(column: &str, value: T) -> QueryBuilder<Self>
    where
        Self: Sized,
    {
        Self::query().where_eq(column, value)
    }

    /// Every visible document of the collection
    async fn all(db: &dyn DocumentDatabase) -> ModelResult<Vec<Entity<Self>>>
    where
        Self: Sized,
    {
        Self::query().get(db).await
    }

    /// Number of visible documents
    async fn count(db: &dyn DocumentDatabase) -> ModelResult<u64>
    where
        Self: Sized,
    {
        Self::query().count(db).await
    }

    async fn paginate(db: &dyn DocumentDatabase, page: u64, per_page: u64) -> ModelResult<Paginated<Entity<Self>>>
    where
        Self: Sized,
    {
        Self::query().paginate(db, page, per_page).await
    }
}

impl<M: Model> QueryMethods for M {}
