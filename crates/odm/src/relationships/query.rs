//! Lazy Relation Queries
//!
//! A [`RelationQuery`] is the handle returned by the relation factories on
//! [`Entity`]. It carries the relation's descriptor, a snapshot of the
//! owner's attributes and a query builder over the related model. The same
//! handle serves both resolution paths:
//!
//! - eager: registered through [`RelationRegistry::define`](super::registry::RelationRegistry::define),
//!   its descriptor is compiled into `$lookup` stages;
//! - lazy: [`RelationQuery::resolve`] turns the owner's key values into a
//!   constrained query on the related collection.

use std::marker::PhantomData;

use serde_json::Value;

use super::compiler::pivot_conditions;
use super::metadata::{RelationDescriptor, RelationKeys, RelationOptions, RelationshipType};
use super::registry::IntoDescriptor;
use crate::backends::{Document, DocumentDatabase};
use crate::error::{ModelError, ModelResult};
use crate::model::{canonicalize_value, Entity, Model};
use crate::query::{pipeline_to_value, Paginated, QueryBuilder, SortDirection, Stage};
use crate::soft_delete::{SoftDeletePolicy, TrashedMode};

/// Type-level relationship kinds
pub mod kinds {
    use super::RelationshipType;

    /// Marker for a relationship kind
    pub trait RelationKind: Send + Sync + 'static {
        const KIND: RelationshipType;
    }

    /// Kinds whose foreign key lives on the related side
    pub trait OwningKind: RelationKind {}

    /// Kinds reconciled through a pivot collection
    pub trait PivotKind: RelationKind {}

    macro_rules! relation_kinds {
        ($($marker:ident => $kind:ident),* $(,)?) => {
            $(
                #[derive(Debug, Clone, Copy, PartialEq, Eq)]
                pub struct $marker;

                impl RelationKind for $marker {
                    const KIND: RelationshipType = RelationshipType::$kind;
                }
            )*
        };
    }

    relation_kinds! {
        HasOneKind => HasOne,
        BelongsToKind => BelongsTo,
        HasManyKind => HasMany,
        BelongsToManyKind => BelongsToMany,
        HasManyThroughKind => HasManyThrough,
        MorphToKind => MorphTo,
        MorphManyKind => MorphMany,
        MorphToManyKind => MorphToMany,
        MorphedByManyKind => MorphedByMany,
    }

    impl OwningKind for HasOneKind {}
    impl OwningKind for HasManyKind {}
    impl OwningKind for MorphToKind {}
    impl OwningKind for MorphManyKind {}

    impl PivotKind for BelongsToManyKind {}
    impl PivotKind for MorphToManyKind {}
    impl PivotKind for MorphedByManyKind {}
}

use kinds::RelationKind;

/// Relation handle from an owner of type `O` to related documents of type `R`
pub struct RelationQuery<O: Model, R: Model, K: RelationKind> {
    descriptor: RelationDescriptor,
    owner: Document,
    query: QueryBuilder<R>,
    _marker: PhantomData<fn() -> (O, K)>,
}

pub type HasOne<O, R> = RelationQuery<O, R, kinds::HasOneKind>;
pub type BelongsTo<O, R> = RelationQuery<O, R, kinds::BelongsToKind>;
pub type HasMany<O, R> = RelationQuery<O, R, kinds::HasManyKind>;
pub type BelongsToMany<O, R> = RelationQuery<O, R, kinds::BelongsToManyKind>;
pub type HasManyThrough<O, R> = RelationQuery<O, R, kinds::HasManyThroughKind>;
pub type MorphTo<O, R> = RelationQuery<O, R, kinds::MorphToKind>;
pub type MorphMany<O, R> = RelationQuery<O, R, kinds::MorphManyKind>;
pub type MorphToMany<O, R> = RelationQuery<O, R, kinds::MorphToManyKind>;
pub type MorphedByMany<O, R> = RelationQuery<O, R, kinds::MorphedByManyKind>;

impl<O: Model, R: Model, K: RelationKind> Clone for RelationQuery<O, R, K> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            owner: self.owner.clone(),
            query: self.query.clone(),
            _marker: PhantomData,
        }
    }
}

impl<O: Model, R: Model, K: RelationKind> std::fmt::Debug for RelationQuery<O, R, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationQuery")
            .field("descriptor", &self.descriptor)
            .field("query", &self.query)
            .finish()
    }
}

macro_rules! delegate_to_builder {
    ($($(#[$doc:meta])* $name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            $(#[$doc])*
            pub fn $name(mut self, $($arg: $ty),*) -> Self {
                self.query = self.query.$name($($arg),*);
                self
            }
        )*
    };
}

impl<O: Model, R: Model, K: RelationKind> RelationQuery<O, R, K> {
    pub(crate) fn new(owner: &Entity<O>, descriptor: RelationDescriptor) -> Self {
        Self {
            descriptor,
            owner: owner.attributes().clone(),
            query: QueryBuilder::new(),
            _marker: PhantomData,
        }
    }

    pub fn kind(&self) -> RelationshipType {
        K::KIND
    }

    pub fn descriptor(&self) -> &RelationDescriptor {
        &self.descriptor
    }

    pub(crate) fn descriptor_mut(&mut self) -> &mut RelationDescriptor {
        &mut self.descriptor
    }

    /// Owner attribute snapshot taken when the handle was created
    pub fn owner_attributes(&self) -> &Document {
        &self.owner
    }

    /// Field the relation is embedded under when eager-loaded
    pub fn alias(mut self, alias: &str) -> Self {
        self.descriptor.alias = Some(alias.to_string());
        self
    }

    /// Include soft-deleted related documents
    pub fn with_trashed(mut self) -> Self {
        self.descriptor.options.trashed = Some(TrashedMode::WithTrashed);
        self
    }

    /// Only soft-deleted related documents
    pub fn only_trashed(mut self) -> Self {
        self.descriptor.options.trashed = Some(TrashedMode::OnlyTrashed);
        self
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor.options = self.descriptor.options.clone().select(fields);
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor.options = self.descriptor.options.clone().exclude(fields);
        self
    }

    pub fn make_visible<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor.options = self.descriptor.options.clone().make_visible(fields);
        self
    }

    pub fn sort(mut self, column: &str, direction: SortDirection) -> Self {
        self.descriptor.options.sort = Some((column.to_string(), direction));
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.descriptor.options.skip = Some(n);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.descriptor.options.limit = Some(n);
        self
    }

    /// Overlay an options bag on the relation's options
    pub fn options(mut self, options: &RelationOptions) -> Self {
        self.descriptor.options = self.descriptor.options.merged_with(options);
        self
    }

    delegate_to_builder! {
        where_eq(column: &str, value: impl Into<Value>);
        or_where_eq(column: &str, value: impl Into<Value>);
        where_op(column: &str, operator: &str, value: impl Into<Value>);
        or_where_op(column: &str, operator: &str, value: impl Into<Value>);
        where_ne(column: &str, value: impl Into<Value>);
        where_gt(column: &str, value: impl Into<Value>);
        where_lt(column: &str, value: impl Into<Value>);
        where_like(column: &str, pattern: &str);
        where_in(column: &str, values: Vec<Value>);
        or_where_in(column: &str, values: Vec<Value>);
        where_not_in(column: &str, values: Vec<Value>);
        where_between(column: &str, start: Value, end: Value);
        or_where_between(column: &str, start: Value, end: Value);
        where_null(column: &str);
        or_where_null(column: &str);
        where_not_null(column: &str);
        order_by(column: &str, direction: SortDirection);
        order_by_desc(column: &str);
        order_by_case_insensitive(column: &str, direction: SortDirection);
        /// Eager-load relations of the related documents
        with(path: &str);
        with_nested(relation: &str, nested: &[&str]);
        with_options(path: &str, options: RelationOptions);
    }

    fn owner_value(&self, key: &str) -> Option<Value> {
        match self.owner.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => Some(canonicalize_value(value)),
        }
    }

    /// The owner's key value, required by write operations
    pub(crate) fn require_owner_value(&self, key: &str) -> ModelResult<Value> {
        self.owner_value(key).ok_or(ModelError::MissingPrimaryKey)
    }

    /// Builder with the relation's options, trashed mode and caller predicates
    fn base_query(&self) -> QueryBuilder<R> {
        let options = &self.descriptor.options;
        let mut query = self.query.clone().trashed(self.descriptor.trashed());
        if let Some((column, direction)) = &options.sort {
            query = query.order_by(column, *direction);
        }
        if let Some(n) = options.skip {
            query = query.skip(n);
        }
        if let Some(n) = options.limit {
            query = query.limit(n);
        }
        if let Some(fields) = &options.select {
            let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
            query = query.select(&fields);
        } else {
            let hidden = options.hidden_fields(R::hidden());
            if !hidden.is_empty() {
                let hidden: Vec<&str> = hidden.iter().map(String::as_str).collect();
                query = query.exclude(&hidden);
            }
        }
        query
    }

    /// Values of `field` across the documents an intermediate read returns
    async fn intermediate_values(
        &self,
        db: &dyn DocumentDatabase,
        collection: &str,
        stages: Vec<Stage>,
        field: &str,
    ) -> ModelResult<Vec<Value>> {
        tracing::debug!(
            relation = %self.descriptor.name,
            collection,
            pipeline = %pipeline_to_value(&stages),
            "intermediate read"
        );
        let rows = db.collection(collection).aggregate(stages).await?;
        let mut values: Vec<Value> = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(value) = row.get(field).filter(|v| !v.is_null()) {
                let value = canonicalize_value(value);
                if !values.contains(&value) {
                    values.push(value);
                }
            }
        }
        Ok(values)
    }

    /// The related query constrained to this owner. Pivot and through kinds
    /// read their intermediate collection first.
    pub async fn resolve(&self, db: &dyn DocumentDatabase) -> ModelResult<QueryBuilder<R>> {
        let query = QueryBuilder::<R>::new();
        let scope = match &self.descriptor.keys {
            RelationKeys::Owning { foreign_key, local_key } => match self.owner_value(local_key) {
                Some(value) => query.where_eq(foreign_key, value),
                None => query.where_in(foreign_key, Vec::<Value>::new()),
            },
            RelationKeys::Inverse { foreign_key, owner_key } => match self.owner_value(foreign_key) {
                Some(value) => query.where_eq(owner_key, value),
                None => query.where_in(owner_key, Vec::<Value>::new()),
            },
            RelationKeys::Pivot(pivot) => {
                let ids = match self.owner_value(&pivot.parent_key) {
                    Some(owner) => {
                        let mut stages = vec![Stage::match_filter(single_field(&pivot.foreign_pivot_key, owner))];
                        let conditions = pivot_conditions(pivot);
                        if !conditions.is_empty() {
                            stages.push(Stage::match_expr(conditions));
                        }
                        self.intermediate_values(db, &pivot.collection, stages, &pivot.related_pivot_key)
                            .await?
                    }
                    None => Vec::new(),
                };
                query.where_in(&pivot.related_key, ids)
            }
            RelationKeys::Through {
                first_key,
                second_key,
                local_key,
                second_local_key,
            } => {
                let through = self.descriptor.through.as_ref().ok_or_else(|| {
                    ModelError::Query(format!(
                        "'{}' is missing its intermediate model",
                        self.descriptor.name
                    ))
                })?;
                let ids = match self.owner_value(local_key) {
                    Some(owner) => {
                        let mut stages = Vec::new();
                        stages.extend(SoftDeletePolicy::for_meta(through, TrashedMode::Default).root_stage());
                        stages.push(Stage::match_filter(single_field(first_key, owner)));
                        self.intermediate_values(db, through.collection, stages, second_local_key)
                            .await?
                    }
                    None => Vec::new(),
                };
                query.where_in(second_key, ids)
            }
            RelationKeys::Morph {
                type_field,
                id_field,
                local_key,
            } => match self.owner_value(local_key) {
                Some(value) => query
                    .where_eq(type_field, self.descriptor.owner.type_name)
                    .where_eq(id_field, value),
                None => query.where_in(id_field, Vec::<Value>::new()),
            },
        };
        let constrained = self.base_query().scoped_by(scope);

        tracing::debug!(
            model = O::type_name(),
            relation = %self.descriptor.name,
            kind = %K::KIND,
            "resolved lazy relation"
        );
        Ok(constrained)
    }

    /// The pipeline a lazy `get` would send to the related collection
    pub async fn to_pipeline(&self, db: &dyn DocumentDatabase) -> ModelResult<Vec<Stage>> {
        self.resolve(db).await?.to_pipeline()
    }

    pub async fn get(&self, db: &dyn DocumentDatabase) -> ModelResult<Vec<Entity<R>>> {
        self.resolve(db).await?.get(db).await
    }

    pub async fn first(&self, db: &dyn DocumentDatabase) -> ModelResult<Option<Entity<R>>> {
        self.resolve(db).await?.first(db).await
    }

    pub async fn first_or_fail(&self, db: &dyn DocumentDatabase) -> ModelResult<Entity<R>> {
        self.resolve(db).await?.first_or_fail(db).await
    }

    pub async fn count(&self, db: &dyn DocumentDatabase) -> ModelResult<u64> {
        self.resolve(db).await?.count(db).await
    }

    pub async fn exists(&self, db: &dyn DocumentDatabase) -> ModelResult<bool> {
        self.resolve(db).await?.exists(db).await
    }

    pub async fn sum(&self, db: &dyn DocumentDatabase, column: &str) -> ModelResult<f64> {
        self.resolve(db).await?.sum(db, column).await
    }

    pub async fn avg(&self, db: &dyn DocumentDatabase, column: &str) -> ModelResult<f64> {
        self.resolve(db).await?.avg(db, column).await
    }

    pub async fn min(&self, db: &dyn DocumentDatabase, column: &str) -> ModelResult<f64> {
        self.resolve(db).await?.min(db, column).await
    }

    pub async fn max(&self, db: &dyn DocumentDatabase, column: &str) -> ModelResult<f64> {
        self.resolve(db).await?.max(db, column).await
    }

    pub async fn pluck(&self, db: &dyn DocumentDatabase, column: &str) -> ModelResult<Vec<Value>> {
        self.resolve(db).await?.pluck(db, column).await
    }

    pub async fn paginate(
        &self,
        db: &dyn DocumentDatabase,
        page: u64,
        per_page: u64,
    ) -> ModelResult<Paginated<Entity<R>>> {
        self.resolve(db).await?.paginate(db, page, per_page).await
    }
}

/// `{ field: value }`
pub(crate) fn single_field(field: &str, value: Value) -> Value {
    let mut filter = serde_json::Map::new();
    filter.insert(field.to_string(), value);
    Value::Object(filter)
}

impl<O: Model, R: Model, K: RelationKind> IntoDescriptor for RelationQuery<O, R, K> {
    fn into_descriptor(self) -> RelationDescriptor {
        self.descriptor
    }
}

impl<O: Model, R: Model, K: RelationKind> From<RelationQuery<O, R, K>> for RelationDescriptor {
    fn from(query: RelationQuery<O, R, K>) -> Self {
        query.descriptor
    }
}
