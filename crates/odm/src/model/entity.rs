//! Entity - a document of model `M` with change tracking
//!
//! An entity keeps the last persisted state (`original`) next to the current
//! attributes and an explicit set of changed field names. Mutations go
//! through [`Entity::set`] / [`Entity::unset`], which keep the change set
//! exact: a field whose current value equals its original value is never
//! listed as changed. Eager-loaded relation data is split out of the
//! attributes on load and kept apart, keyed by alias.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use super::core_trait::Model;
use super::primary_key::{DocumentId, IntoDocumentId};
use crate::backends::Document;
use crate::error::{ModelError, ModelResult};
use crate::relationships::eager_loading::EagerAlias;

/// Relation data loaded together with an entity
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LoadedRelation {
    pub value: Value,
    pub children: Vec<EagerAlias>,
}

/// A document of model `M`
pub struct Entity<M: Model> {
    attributes: Document,
    original: Document,
    changes: BTreeSet<String>,
    relations: BTreeMap<String, LoadedRelation>,
    exists: bool,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Clone for Entity<M> {
    fn clone(&self) -> Self {
        Self {
            attributes: self.attributes.clone(),
            original: self.original.clone(),
            changes: self.changes.clone(),
            relations: self.relations.clone(),
            exists: self.exists,
            _model: PhantomData,
        }
    }
}

impl<M: Model> fmt::Debug for Entity<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(M::type_name())
            .field("attributes", &self.attributes)
            .field("changes", &self.changes)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .field("exists", &self.exists)
            .finish()
    }
}

impl<M: Model> Default for Entity<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> PartialEq for Entity<M> {
    fn eq(&self, other: &Self) -> bool {
        self.attributes == other.attributes && self.relations == other.relations
    }
}

impl<M: Model> Entity<M> {
    /// A blank, unsaved entity
    pub fn new() -> Self {
        Self {
            attributes: Map::new(),
            original: Map::new(),
            changes: BTreeSet::new(),
            relations: BTreeMap::new(),
            exists: false,
            _model: PhantomData,
        }
    }

    /// An unsaved entity with the given attributes, all marked as changed
    pub fn from_attributes(attributes: Document) -> Self {
        let changes = attributes.keys().cloned().collect();
        Self {
            attributes,
            changes,
            ..Self::new()
        }
    }

    /// An unsaved entity from a JSON object
    pub fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_attributes(map)),
            other => Err(ModelError::InvalidArgument(format!(
                "{} attributes must be a JSON object, got {}",
                M::type_name(),
                other
            ))),
        }
    }

    /// An unsaved entity from any serializable value
    pub fn from_typed<T: Serialize>(value: &T) -> ModelResult<Self> {
        Self::from_value(serde_json::to_value(value)?)
    }

    /// A persisted entity as returned by the store; `aliases` name the
    /// eager-loaded relation fields to split out
    pub(crate) fn from_document(mut document: Document, aliases: &[EagerAlias]) -> Self {
        let mut relations = BTreeMap::new();
        for node in aliases {
            let value = document.remove(&node.alias).unwrap_or(if node.single {
                Value::Null
            } else {
                Value::Array(Vec::new())
            });
            relations.insert(
                node.alias.clone(),
                LoadedRelation {
                    value,
                    children: node.children.clone(),
                },
            );
        }
        Self {
            original: document.clone(),
            attributes: document,
            changes: BTreeSet::new(),
            relations,
            exists: true,
            _model: PhantomData,
        }
    }

    /// Identifier, when present and well-formed
    pub fn id(&self) -> Option<DocumentId> {
        self.attributes
            .get(M::primary_key_name())
            .and_then(|v| v.into_document_id().ok())
    }

    /// Identifier or [`ModelError::MissingPrimaryKey`]
    pub fn require_id(&self) -> ModelResult<DocumentId> {
        self.id().ok_or(ModelError::MissingPrimaryKey)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Dotted-path lookup through nested objects
    pub fn value_at(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.attributes.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    pub fn attributes(&self) -> &Document {
        &self.attributes
    }

    /// Last persisted state
    pub fn original(&self) -> &Document {
        &self.original
    }

    /// Set a field, returning its previous value
    pub fn set<V: Into<Value>>(&mut self, key: &str, value: V) -> Option<Value> {
        let value = value.into();
        if self.original.get(key) == Some(&value) {
            self.changes.remove(key);
        } else {
            self.changes.insert(key.to_string());
        }
        self.attributes.insert(key.to_string(), value)
    }

    /// Builder-style [`set`](Self::set)
    pub fn with_attribute<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        self.set(key, value);
        self
    }

    /// Remove a field, returning its previous value
    pub fn unset(&mut self, key: &str) -> Option<Value> {
        if self.original.contains_key(key) {
            self.changes.insert(key.to_string());
        } else {
            self.changes.remove(key);
        }
        self.attributes.remove(key)
    }

    /// Set several fields
    pub fn fill(&mut self, attributes: Document) {
        for (key, value) in attributes {
            self.set(&key, value);
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn is_dirty_field(&self, key: &str) -> bool {
        self.changes.contains(key)
    }

    /// Names of changed fields
    pub fn dirty_fields(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(String::as_str)
    }

    /// Changed fields that still exist, with their current values
    pub fn get_changes(&self) -> Document {
        self.changes
            .iter()
            .filter_map(|k| self.attributes.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Changed fields that were removed
    pub fn removed_fields(&self) -> Vec<String> {
        self.changes
            .iter()
            .filter(|k| !self.attributes.contains_key(*k))
            .cloned()
            .collect()
    }

    /// Discard unsaved changes
    pub fn revert(&mut self) {
        self.attributes = self.original.clone();
        self.changes.clear();
    }

    /// Whether the entity has been persisted
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Whether the soft-delete marker is set
    pub fn is_trashed(&self) -> bool {
        M::uses_soft_deletes()
            && self.attributes.get(M::soft_delete_field()) == Some(&Value::Bool(true))
    }

    /// Mark the current state as persisted
    pub(crate) fn sync_original(&mut self) {
        self.original = self.attributes.clone();
        self.changes.clear();
        self.exists = true;
    }

    pub(crate) fn mark_missing(&mut self) {
        self.exists = false;
    }

    /// Replace state with a freshly loaded copy
    pub(crate) fn replace_with(&mut self, fresh: Entity<M>) {
        *self = fresh;
    }

    /// Adopt the loaded relations of a fresh copy of the same document
    pub(crate) fn absorb_relations(&mut self, fresh: Entity<M>) {
        self.relations.extend(fresh.relations);
    }

    pub fn relation_loaded(&self, alias: &str) -> bool {
        self.relations.contains_key(alias)
    }

    /// Raw eager-loaded data for `alias`
    pub fn relation_value(&self, alias: &str) -> Option<&Value> {
        self.relations.get(alias).map(|r| &r.value)
    }

    /// Aliases of eager-loaded relations
    pub fn loaded_relations(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    /// Attach relation data, e.g. after a lazy fetch
    pub fn set_relation(&mut self, alias: &str, value: Value) {
        self.relations.insert(
            alias.to_string(),
            LoadedRelation {
                value,
                children: Vec::new(),
            },
        );
    }

    /// Eager-loaded relation documents as entities of `R`
    pub fn related<R: Model>(&self, alias: &str) -> ModelResult<Vec<Entity<R>>> {
        let loaded = self.relations.get(alias).ok_or_else(|| ModelError::RelationNotFound {
            model: M::type_name().to_string(),
            relation: alias.to_string(),
        })?;

        let items: Vec<&Value> = match &loaded.value {
            Value::Null => Vec::new(),
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(Entity::<R>::from_document(map.clone(), &loaded.children)),
                other => Err(ModelError::Query(format!(
                    "relation '{}' holds a non-document value: {}",
                    alias, other
                ))),
            })
            .collect()
    }

    /// Single eager-loaded relation document as an entity of `R`
    pub fn related_one<R: Model>(&self, alias: &str) -> ModelResult<Option<Entity<R>>> {
        Ok(self.related::<R>(alias)?.into_iter().next())
    }

    /// Visible JSON form: hidden fields removed, relations embedded
    pub fn to_value(&self) -> Value {
        let mut out = self.attributes.clone();
        for field in M::hidden() {
            out.remove(*field);
        }
        for (alias, loaded) in &self.relations {
            out.insert(alias.clone(), loaded.value.clone());
        }
        Value::Object(out)
    }

    /// Deserialize attributes and relations into a typed struct
    pub fn into_typed<T: DeserializeOwned>(&self) -> ModelResult<T> {
        let mut all = self.attributes.clone();
        for (alias, loaded) in &self.relations {
            all.insert(alias.clone(), loaded.value.clone());
        }
        Ok(serde_json::from_value(Value::Object(all))?)
    }
}

impl<M: Model> Serialize for Entity<M> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}
