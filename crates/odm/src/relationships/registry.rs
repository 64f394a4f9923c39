//! Relationship Registry - named relation factories per model type
//!
//! Each model declares its relations once in [`Model::relations`]. The
//! resulting registry maps a relation name to a closure producing the
//! relation's descriptor for a given owner. Registries are built lazily on
//! first use and cached process-wide, keyed by the model's `TypeId`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use super::metadata::RelationDescriptor;
use crate::error::{ModelError, ModelResult};
use crate::model::{Entity, Model};

type Factory<M> = Arc<dyn Fn(&Entity<M>) -> RelationDescriptor + Send + Sync>;

static REGISTRIES: Lazy<DashMap<TypeId, Arc<dyn Any + Send + Sync>>> = Lazy::new(DashMap::new);

/// Anything that yields a relation descriptor, e.g. a relation handle
pub trait IntoDescriptor {
    fn into_descriptor(self) -> RelationDescriptor;
}

impl IntoDescriptor for RelationDescriptor {
    fn into_descriptor(self) -> RelationDescriptor {
        self
    }
}

/// Relations declared by model `M`
pub struct RelationRegistry<M: Model> {
    factories: HashMap<String, Factory<M>>,
    order: Vec<String>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Default for RelationRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> std::fmt::Debug for RelationRegistry<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationRegistry")
            .field("model", &M::type_name())
            .field("relations", &self.order)
            .finish()
    }
}

impl<M: Model> RelationRegistry<M> {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            order: Vec::new(),
            _model: PhantomData,
        }
    }

    /// Declare relation `name`. The factory receives the owner and returns
    /// a relation handle; its alias defaults to `name`.
    pub fn define<F, Q>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&Entity<M>) -> Q + Send + Sync + 'static,
        Q: IntoDescriptor,
    {
        let relation = name.to_string();
        let wrapped: Factory<M> = Arc::new(move |owner: &Entity<M>| {
            let mut descriptor = factory(owner).into_descriptor();
            descriptor.name = relation.clone();
            descriptor
        });
        if self.factories.insert(name.to_string(), wrapped).is_none() {
            self.order.push(name.to_string());
        } else {
            tracing::warn!(model = M::type_name(), relation = name, "relation redefined");
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Declared relation names, in declaration order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Descriptor of relation `name` for `owner`
    pub fn descriptor(&self, name: &str, owner: &Entity<M>) -> ModelResult<RelationDescriptor> {
        let factory = self.factories.get(name).ok_or_else(|| ModelError::RelationNotFound {
            model: M::type_name().to_string(),
            relation: name.to_string(),
        })?;
        let descriptor = factory(owner);
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// The cached registry of `M`
pub fn registry_for<M: Model>() -> Arc<RelationRegistry<M>> {
    let key = TypeId::of::<M>();
    if let Some(existing) = REGISTRIES.get(&key) {
        if let Ok(registry) = Arc::clone(existing.value()).downcast::<RelationRegistry<M>>() {
            return registry;
        }
    }

    // Build outside the map lock; factories may touch other models' metadata
    let mut registry = RelationRegistry::<M>::new();
    M::relations(&mut registry);
    let built: Arc<dyn Any + Send + Sync> = Arc::new(registry);
    let stored = Arc::clone(REGISTRIES.entry(key).or_insert(built).value());
    stored
        .downcast::<RelationRegistry<M>>()
        .unwrap_or_else(|_| {
            let mut registry = RelationRegistry::<M>::new();
            M::relations(&mut registry);
            Arc::new(registry)
        })
}

/// Descriptor of `M`'s relation `name`, with key names only (no owner values)
pub fn resolve_relation<M: Model>(name: &str) -> ModelResult<RelationDescriptor> {
    registry_for::<M>().descriptor(name, &Entity::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationships::RelationshipType;

    struct Author;
    struct Book;

    impl Model for Author {
        fn type_name() -> &'static str {
            "Author"
        }

        fn collection_name() -> &'static str {
            "authors"
        }

        fn relations(relations: &mut RelationRegistry<Self>) {
            relations.define("books", |author| author.has_many::<Book>());
        }
    }

    impl Model for Book {
        fn type_name() -> &'static str {
            "Book"
        }

        fn collection_name() -> &'static str {
            "books"
        }
    }

    #[test]
    fn names_resolve_to_descriptors() {
        let descriptor = resolve_relation::<Author>("books").unwrap();
        assert_eq!(descriptor.kind, RelationshipType::HasMany);
        assert_eq!(descriptor.alias(), "books");
        assert_eq!(descriptor.related.collection, "books");
    }

    #[test]
    fn unknown_relation_fails_fast() {
        let err = resolve_relation::<Author>("reviews").unwrap_err();
        assert!(matches!(err, ModelError::RelationNotFound { ref relation, .. } if relation == "reviews"));
        assert!(resolve_relation::<Book>("authors").is_err());
    }

    #[test]
    fn registry_is_cached() {
        let a = registry_for::<Author>();
        let b = registry_for::<Author>();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.names(), ["books".to_string()]);
    }
}
