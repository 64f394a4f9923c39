//! Relation factories on [`Entity`]
//!
//! Each factory builds a relation handle with the conventional key names:
//! foreign keys are `lowerCamel(type) + "Id"`, local keys are primary keys,
//! plain pivots are named after both types and polymorphic ones after the
//! morph name. Every key can be overridden on the returned handle.

use super::metadata::{PivotKeys, PivotSoftDelete, RelationDescriptor, RelationKeys, RelationOptions};
use super::query::kinds::RelationKind;
use super::query::{
    BelongsTo, BelongsToMany, HasMany, HasManyThrough, HasOne, MorphMany, MorphTo, MorphToMany,
    MorphedByMany, RelationQuery,
};
use super::registry::registry_for;
use crate::config::OdmConfig;
use crate::error::ModelResult;
use crate::model::{foreign_key_for, pivot_collection_for, Entity, Model, ModelMeta};

fn descriptor<M: Model, R: Model, K: RelationKind>(keys: RelationKeys) -> RelationDescriptor {
    RelationDescriptor {
        kind: K::KIND,
        name: R::collection_name().to_string(),
        alias: None,
        owner: ModelMeta::of::<M>(),
        related: ModelMeta::of::<R>(),
        through: None,
        keys,
        options: RelationOptions::default(),
    }
}

fn morph_pivot(
    name: &str,
    foreign_pivot_key: String,
    related_pivot_key: String,
    parent_key: &str,
    related_key: &str,
    type_name: &str,
) -> PivotKeys {
    PivotKeys {
        collection: format!("{}s", name),
        foreign_pivot_key,
        related_pivot_key,
        parent_key: parent_key.to_string(),
        related_key: related_key.to_string(),
        morph_type: Some((format!("{}Type", name), type_name.to_string())),
        soft_delete: None,
        timestamps: None,
    }
}

impl<M: Model> Entity<M> {
    fn relation_handle<R: Model, K: RelationKind>(&self, keys: RelationKeys) -> RelationQuery<M, R, K> {
        RelationQuery::new(self, descriptor::<M, R, K>(keys))
    }

    /// Descriptor of the declared relation `name` for this entity
    pub fn relation(&self, name: &str) -> ModelResult<RelationDescriptor> {
        registry_for::<M>().descriptor(name, self)
    }

    /// One related document holding this entity's key
    pub fn has_one<R: Model>(&self) -> HasOne<M, R> {
        self.relation_handle(RelationKeys::Owning {
            foreign_key: foreign_key_for(M::type_name()),
            local_key: M::primary_key_name().to_string(),
        })
    }

    /// Many related documents holding this entity's key
    pub fn has_many<R: Model>(&self) -> HasMany<M, R> {
        self.relation_handle(RelationKeys::Owning {
            foreign_key: foreign_key_for(M::type_name()),
            local_key: M::primary_key_name().to_string(),
        })
    }

    /// The parent this entity references
    pub fn belongs_to<R: Model>(&self) -> BelongsTo<M, R> {
        self.relation_handle(RelationKeys::Inverse {
            foreign_key: foreign_key_for(R::type_name()),
            owner_key: R::primary_key_name().to_string(),
        })
    }

    /// Many-to-many through the pivot collection named after both types
    pub fn belongs_to_many<R: Model>(&self) -> BelongsToMany<M, R> {
        let config = OdmConfig::global();
        self.relation_handle(RelationKeys::Pivot(PivotKeys {
            collection: pivot_collection_for(M::type_name(), R::type_name()),
            foreign_pivot_key: foreign_key_for(M::type_name()),
            related_pivot_key: foreign_key_for(R::type_name()),
            parent_key: M::primary_key_name().to_string(),
            related_key: R::primary_key_name().to_string(),
            morph_type: None,
            soft_delete: Some(PivotSoftDelete {
                field: config.soft_delete_field.clone(),
                deleted_at_field: Some(config.deleted_at_field.clone()),
            }),
            timestamps: None,
        }))
    }

    /// Related documents reached through intermediate model `T`
    pub fn has_many_through<R: Model, T: Model>(&self) -> HasManyThrough<M, R> {
        let mut handle: HasManyThrough<M, R> = self.relation_handle(RelationKeys::Through {
            first_key: foreign_key_for(M::type_name()),
            second_key: foreign_key_for(T::type_name()),
            local_key: M::primary_key_name().to_string(),
            second_local_key: T::primary_key_name().to_string(),
        });
        handle.descriptor_mut().through = Some(ModelMeta::of::<T>());
        handle
    }

    /// One related document storing `{name}Type` / `{name}Id` pointing here
    pub fn morph_to<R: Model>(&self, name: &str) -> MorphTo<M, R> {
        self.relation_handle(RelationKeys::Morph {
            type_field: format!("{}Type", name),
            id_field: format!("{}Id", name),
            local_key: M::primary_key_name().to_string(),
        })
    }

    /// Many related documents storing `{name}Type` / `{name}Id` pointing here
    pub fn morph_many<R: Model>(&self, name: &str) -> MorphMany<M, R> {
        self.relation_handle(RelationKeys::Morph {
            type_field: format!("{}Type", name),
            id_field: format!("{}Id", name),
            local_key: M::primary_key_name().to_string(),
        })
    }

    /// Polymorphic many-to-many through the `{name}s` collection
    pub fn morph_to_many<R: Model>(&self, name: &str) -> MorphToMany<M, R> {
        self.relation_handle(RelationKeys::Pivot(morph_pivot(
            name,
            format!("{}Id", name),
            foreign_key_for(R::type_name()),
            M::primary_key_name(),
            R::primary_key_name(),
            M::type_name(),
        )))
    }

    /// Inverse of [`morph_to_many`](Self::morph_to_many): owners of type `R`
    /// associated with this entity through `{name}s`
    pub fn morphed_by_many<R: Model>(&self, name: &str) -> MorphedByMany<M, R> {
        self.relation_handle(RelationKeys::Pivot(morph_pivot(
            name,
            foreign_key_for(M::type_name()),
            format!("{}Id", name),
            M::primary_key_name(),
            R::primary_key_name(),
            R::type_name(),
        )))
    }
}

impl<O: Model, R: Model, K: RelationKind> RelationQuery<O, R, K> {
    /// Override the foreign key (related side for hasOne/hasMany, owner
    /// side for belongsTo, related side for hasManyThrough)
    pub fn foreign_key(mut self, key: &str) -> Self {
        match &mut self.descriptor_mut().keys {
            RelationKeys::Owning { foreign_key, .. } | RelationKeys::Inverse { foreign_key, .. } => {
                *foreign_key = key.to_string()
            }
            RelationKeys::Through { second_key, .. } => *second_key = key.to_string(),
            RelationKeys::Morph { id_field, .. } => *id_field = key.to_string(),
            RelationKeys::Pivot(pivot) => pivot.foreign_pivot_key = key.to_string(),
        }
        self
    }

    /// Override the owner field the relation starts from
    pub fn local_key(mut self, key: &str) -> Self {
        match &mut self.descriptor_mut().keys {
            RelationKeys::Owning { local_key, .. }
            | RelationKeys::Through { local_key, .. }
            | RelationKeys::Morph { local_key, .. } => *local_key = key.to_string(),
            RelationKeys::Pivot(pivot) => pivot.parent_key = key.to_string(),
            RelationKeys::Inverse { .. } => {}
        }
        self
    }

    /// Override the parent key a belongsTo foreign key references
    pub fn owner_key(mut self, key: &str) -> Self {
        if let RelationKeys::Inverse { owner_key, .. } = &mut self.descriptor_mut().keys {
            *owner_key = key.to_string();
        }
        self
    }

    /// Override the intermediate field referencing the owner (hasManyThrough)
    pub fn first_key(mut self, key: &str) -> Self {
        if let RelationKeys::Through { first_key, .. } = &mut self.descriptor_mut().keys {
            *first_key = key.to_string();
        }
        self
    }

    /// Override the intermediate field the related foreign key references
    pub fn second_local_key(mut self, key: &str) -> Self {
        if let RelationKeys::Through { second_local_key, .. } = &mut self.descriptor_mut().keys {
            *second_local_key = key.to_string();
        }
        self
    }
}
