//! Writes through relation handles: creating related documents with their
//! foreign key filled in, and (dis)associating a belongsTo parent.

use serde_json::Value;

use super::metadata::RelationKeys;
use super::query::kinds::{BelongsToKind, OwningKind};
use super::query::RelationQuery;
use crate::backends::DocumentDatabase;
use crate::error::{ModelError, ModelResult};
use crate::model::{Entity, Model};

impl<O: Model, R: Model, K: OwningKind> RelationQuery<O, R, K> {
    /// Point `related` at the owner: the foreign key, plus the discriminator
    /// for polymorphic kinds
    fn link(&self, related: &mut Entity<R>) -> ModelResult<()> {
        match &self.descriptor().keys {
            RelationKeys::Owning { foreign_key, local_key } => {
                let owner = self.require_owner_value(local_key)?;
                related.set(foreign_key, owner);
            }
            RelationKeys::Morph {
                type_field,
                id_field,
                local_key,
            } => {
                let owner = self.require_owner_value(local_key)?;
                related.set(type_field, self.descriptor().owner.type_name);
                related.set(id_field, owner);
            }
            _ => {
                return Err(ModelError::Query(format!(
                    "'{}' cannot link related documents",
                    self.descriptor().name
                )))
            }
        }
        Ok(())
    }

    /// Save `related` as belonging to the owner
    pub async fn save(&self, db: &dyn DocumentDatabase, related: &mut Entity<R>) -> ModelResult<()> {
        self.link(related)?;
        related.save(db).await
    }

    /// Create a related document from a JSON object
    pub async fn create(&self, db: &dyn DocumentDatabase, attributes: Value) -> ModelResult<Entity<R>> {
        let mut related = Entity::<R>::from_value(attributes)?;
        self.save(db, &mut related).await?;
        Ok(related)
    }

    /// Create several related documents, in order
    pub async fn create_many(
        &self,
        db: &dyn DocumentDatabase,
        attributes: Vec<Value>,
    ) -> ModelResult<Vec<Entity<R>>> {
        let mut created = Vec::with_capacity(attributes.len());
        for item in attributes {
            created.push(self.create(db, item).await?);
        }
        Ok(created)
    }
}

impl<O: Model, R: Model> RelationQuery<O, R, BelongsToKind> {
    fn inverse_keys(&self) -> ModelResult<(&str, &str)> {
        match &self.descriptor().keys {
            RelationKeys::Inverse { foreign_key, owner_key } => Ok((foreign_key, owner_key)),
            _ => Err(ModelError::Query(format!(
                "'{}' is not an inverse relation",
                self.descriptor().name
            ))),
        }
    }

    /// Set `owner`'s foreign key to `parent`; persisted on the owner's next save
    pub fn associate(&self, owner: &mut Entity<O>, parent: &Entity<R>) -> ModelResult<()> {
        let (foreign_key, owner_key) = self.inverse_keys()?;
        let value = parent
            .get(owner_key)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or(ModelError::MissingPrimaryKey)?;
        owner.set(foreign_key, value);
        Ok(())
    }

    /// Clear `owner`'s foreign key; persisted on the owner's next save
    pub fn dissociate(&self, owner: &mut Entity<O>) -> ModelResult<()> {
        let (foreign_key, _) = self.inverse_keys()?;
        owner.unset(foreign_key);
        Ok(())
    }
}
