//! CRUD Operations - static create/read/delete entry points for models
//!
//! Lookups by key never fail for a missing document except in the
//! `_or_fail` variants. Identifiers are accepted in any supported form.

use serde_json::{Map, Value};

use super::core_trait::Model;
use super::entity::Entity;
use super::lifecycle::soft_delete_update;
use super::primary_key::{normalize_ids, IntoDocumentId};
use crate::backends::DocumentDatabase;
use crate::error::{ModelError, ModelResult};
use crate::query::QueryBuilder;

/// Trait providing CRUD operations for models
pub trait CrudOperations: Model {
    /// Find a document by its primary key
    async fn find<I: IntoDocumentId>(db: &dyn DocumentDatabase, id: I) -> ModelResult<Option<Entity<Self>>>
    where
        Self: Sized,
    {
        let id = id.into_document_id()?;
        QueryBuilder::<Self>::new()
            .where_eq(Self::primary_key_name(), id.to_value())
            .first(db)
            .await
    }

    /// Find a document by its primary key or return an error if not found
    async fn find_or_fail<I: IntoDocumentId>(db: &dyn DocumentDatabase, id: I) -> ModelResult<Entity<Self>>
    where
        Self: Sized,
    {
        let id = id.into_document_id()?;
        Self::find(db, id)
            .await?
            .ok_or_else(|| ModelError::NotFound(format!("{}({})", Self::collection_name(), id)))
    }

    /// Insert a new document from a JSON object
    async fn create(db: &dyn DocumentDatabase, attributes: Value) -> ModelResult<Entity<Self>>
    where
        Self: Sized,
    {
        let mut entity = Entity::<Self>::from_value(attributes)?;
        entity.save(db).await?;
        Ok(entity)
    }

    /// Insert several documents, in order
    async fn insert_many(db: &dyn DocumentDatabase, items: Vec<Value>) -> ModelResult<Vec<Entity<Self>>>
    where
        Self: Sized,
    {
        let mut created = Vec::with_capacity(items.len());
        for item in items {
            created.push(Self::create(db, item).await?);
        }
        Ok(created)
    }

    /// Delete documents by key: soft when the model soft deletes, otherwise
    /// hard. Returns the number of documents affected.
    async fn destroy<I, T>(db: &dyn DocumentDatabase, ids: I) -> ModelResult<u64>
    where
        Self: Sized,
        I: IntoIterator<Item = T>,
        T: IntoDocumentId,
    {
        let ids: Vec<Value> = normalize_ids(ids)?.iter().map(|id| id.to_value()).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let mut filter = Map::new();
        filter.insert(Self::primary_key_name().to_string(), serde_json::json!({ "$in": ids }));
        let filter = Value::Object(filter);

        let collection = db.collection(Self::collection_name());
        let affected = if Self::uses_soft_deletes() {
            collection.update_many(filter, soft_delete_update::<Self>()).await?.modified
        } else {
            collection.delete_many(filter).await?
        };
        tracing::debug!(model = Self::type_name(), affected, "destroyed");
        Ok(affected)
    }
}

impl<M: Model> CrudOperations for M {}
