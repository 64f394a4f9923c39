//! Entity lifecycle - insert, update, soft delete, restore and reload

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use super::core_trait::Model;
use super::entity::Entity;
use super::primary_key::DocumentId;
use crate::backends::DocumentDatabase;
use crate::error::{ModelError, ModelResult};
use crate::query::QueryBuilder;

/// Current time in the stored timestamp format
pub(crate) fn timestamp() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn id_filter<M: Model>(id: &DocumentId) -> Value {
    let mut filter = Map::new();
    filter.insert(M::primary_key_name().to_string(), id.to_value());
    Value::Object(filter)
}

impl<M: Model> Entity<M> {
    /// Insert the entity, or write its changed fields when it already exists.
    /// An unchanged persisted entity issues no write.
    pub async fn save(&mut self, db: &dyn DocumentDatabase) -> ModelResult<()> {
        if self.exists() {
            self.update(db).await
        } else {
            self.insert(db).await
        }
    }

    async fn insert(&mut self, db: &dyn DocumentDatabase) -> ModelResult<()> {
        let now = timestamp();
        if M::uses_timestamps() {
            if self.get(M::created_at_field()).is_none() {
                self.set(M::created_at_field(), now.clone());
            }
            self.set(M::updated_at_field(), now);
        }
        if M::uses_soft_deletes() && self.get(M::soft_delete_field()).is_none() {
            self.set(M::soft_delete_field(), false);
        }

        let id = match self.get(M::primary_key_name()) {
            None | Some(Value::Null) => DocumentId::new(),
            Some(_) => self.require_id().map_err(|_| {
                ModelError::InvalidArgument(format!(
                    "{} has a malformed '{}'",
                    M::type_name(),
                    M::primary_key_name()
                ))
            })?,
        };
        self.set(M::primary_key_name(), id.to_value());

        let mut document = self.attributes().clone();
        document.insert("_id".to_string(), id.to_value());
        db.collection(M::collection_name()).insert_one(document).await?;

        tracing::debug!(model = M::type_name(), id = %id, "inserted");
        self.sync_original();
        Ok(())
    }

    async fn update(&mut self, db: &dyn DocumentDatabase) -> ModelResult<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        if M::uses_timestamps() {
            self.set(M::updated_at_field(), timestamp());
        }
        let id = self.require_id()?;

        let mut update = Map::new();
        let set = self.get_changes();
        if !set.is_empty() {
            update.insert("$set".to_string(), Value::Object(set));
        }
        let removed: Map<String, Value> = self
            .removed_fields()
            .into_iter()
            .map(|field| (field, Value::String(String::new())))
            .collect();
        if !removed.is_empty() {
            update.insert("$unset".to_string(), Value::Object(removed));
        }

        db.collection(M::collection_name())
            .update_many(id_filter::<M>(&id), Value::Object(update))
            .await?;

        tracing::debug!(model = M::type_name(), id = %id, "updated");
        self.sync_original();
        Ok(())
    }

    /// Delete the entity: soft when the model soft deletes, otherwise hard
    pub async fn delete(&mut self, db: &dyn DocumentDatabase) -> ModelResult<()> {
        if !M::uses_soft_deletes() {
            return self.force_delete(db).await;
        }
        self.set(M::soft_delete_field(), true);
        self.set(M::deleted_at_field(), timestamp());
        self.save(db).await
    }

    /// Clear the soft-delete marker
    pub async fn restore(&mut self, db: &dyn DocumentDatabase) -> ModelResult<()> {
        if !M::uses_soft_deletes() {
            return Err(ModelError::InvalidArgument(format!(
                "{} does not use soft deletes",
                M::type_name()
            )));
        }
        self.set(M::soft_delete_field(), false);
        self.unset(M::deleted_at_field());
        self.save(db).await
    }

    /// Physically remove the document
    pub async fn force_delete(&mut self, db: &dyn DocumentDatabase) -> ModelResult<()> {
        let id = self.require_id()?;
        db.collection(M::collection_name())
            .delete_many(id_filter::<M>(&id))
            .await?;
        tracing::debug!(model = M::type_name(), id = %id, "deleted");
        self.mark_missing();
        Ok(())
    }

    /// Reload attributes from the store, dropping unsaved changes and
    /// loaded relations
    pub async fn refresh(&mut self, db: &dyn DocumentDatabase) -> ModelResult<()> {
        let id = self.require_id()?;
        let fresh = QueryBuilder::<M>::new()
            .with_trashed()
            .where_eq(M::primary_key_name(), id.to_value())
            .first(db)
            .await?
            .ok_or_else(|| ModelError::NotFound(format!("{}({})", M::collection_name(), id)))?;
        self.replace_with(fresh);
        Ok(())
    }

    /// Eager-load relation paths onto an already fetched entity
    pub async fn load(&mut self, db: &dyn DocumentDatabase, paths: &[&str]) -> ModelResult<()> {
        let id = self.require_id()?;
        let query = paths
            .iter()
            .fold(QueryBuilder::<M>::new().with_trashed(), |query, path| query.with(path));
        let fresh = query
            .where_eq(M::primary_key_name(), id.to_value())
            .first(db)
            .await?
            .ok_or_else(|| ModelError::NotFound(format!("{}({})", M::collection_name(), id)))?;
        self.absorb_relations(fresh);
        Ok(())
    }
}

/// Update document that soft-deletes every match
pub(crate) fn soft_delete_update<M: Model>() -> Value {
    let mut set = Map::new();
    set.insert(M::soft_delete_field().to_string(), Value::Bool(true));
    set.insert(M::deleted_at_field().to_string(), timestamp());
    json!({ "$set": set })
}
