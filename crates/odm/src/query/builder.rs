//! Query Builder - accumulates predicates, ordering, paging, projection,
//! soft-delete mode and eager loads for one collection, and assembles them
//! into an aggregation pipeline.

use std::marker::PhantomData;

use serde_json::{json, Map, Value};

use super::stage::Stage;
use super::types::*;
use super::where_clause::filter_document;
use crate::error::{ModelError, ModelResult};
use crate::model::{Model, ModelMeta};
use crate::relationships::compiler::{compile_eager, CompiledEager};
use crate::relationships::eager_loading::{merge_into, parse_map, parse_path, EagerAlias, EagerLoad};
use crate::relationships::RelationOptions;
use crate::soft_delete::{SoftDeletePolicy, TrashedMode};

/// Prefix of temporary fields used for case-insensitive ordering
const ORDER_KEY_PREFIX: &str = "__order_";

/// Query builder for one collection
pub struct QueryBuilder<M = ()> {
    pub(crate) conditions: Vec<WhereTerm>,
    /// Terms every document must satisfy regardless of the OR groups in `conditions`
    pub(crate) scope: Vec<WhereTerm>,
    pub(crate) order_by: Vec<OrderByClause>,
    pub(crate) skip_count: Option<u64>,
    pub(crate) limit_count: Option<u64>,
    pub(crate) select_fields: Option<Vec<String>>,
    pub(crate) exclude_fields: Vec<String>,
    pub(crate) trashed: TrashedMode,
    pub(crate) eager: Vec<EagerLoad>,
    pub(crate) deferred_error: Option<String>,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for QueryBuilder<M> {
    fn clone(&self) -> Self {
        Self {
            conditions: self.conditions.clone(),
            scope: self.scope.clone(),
            order_by: self.order_by.clone(),
            skip_count: self.skip_count,
            limit_count: self.limit_count,
            select_fields: self.select_fields.clone(),
            exclude_fields: self.exclude_fields.clone(),
            trashed: self.trashed,
            eager: self.eager.clone(),
            deferred_error: self.deferred_error.clone(),
            _model: PhantomData,
        }
    }
}

impl<M> std::fmt::Debug for QueryBuilder<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("conditions", &self.conditions)
            .field("scope", &self.scope)
            .field("order_by", &self.order_by)
            .field("skip_count", &self.skip_count)
            .field("limit_count", &self.limit_count)
            .field("select_fields", &self.select_fields)
            .field("exclude_fields", &self.exclude_fields)
            .field("trashed", &self.trashed)
            .field("eager", &self.eager)
            .field("deferred_error", &self.deferred_error)
            .finish()
    }
}

impl<M> Default for QueryBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Stages of a read together with the alias tree of its eager loads
#[derive(Debug, Clone)]
pub(crate) struct ReadPlan {
    pub stages: Vec<Stage>,
    pub aliases: Vec<EagerAlias>,
}

impl<M> QueryBuilder<M> {
    /// Create a new query builder
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
            scope: Vec::new(),
            order_by: Vec::new(),
            skip_count: None,
            limit_count: None,
            select_fields: None,
            exclude_fields: Vec::new(),
            trashed: TrashedMode::Default,
            eager: Vec::new(),
            deferred_error: None,
            _model: PhantomData,
        }
    }

    /// AND the terms of `scope` around every read, outside any OR groups
    /// added with the `or_where_*` methods
    pub(crate) fn scoped_by(mut self, scope: QueryBuilder<M>) -> Self {
        self.scope.extend(scope.conditions);
        self
    }

    /// Eager-load a relation path such as `"posts.comments"`
    pub fn with(mut self, path: &str) -> Self {
        match parse_path(path, None) {
            Ok(node) => merge_into(&mut self.eager, node),
            Err(err) => {
                self.deferred_error.get_or_insert(err.to_string());
            }
        }
        self
    }

    /// Eager-load a relation with nested relations under it
    pub fn with_nested(mut self, relation: &str, nested: &[&str]) -> Self {
        let spec = json!({ relation: nested });
        match parse_map(&spec) {
            Ok(nodes) => {
                for node in nodes {
                    merge_into(&mut self.eager, node);
                }
            }
            Err(err) => {
                self.deferred_error.get_or_insert(err.to_string());
            }
        }
        self
    }

    /// Eager-load a relation path; `options` apply to its last segment
    pub fn with_options(mut self, path: &str, options: RelationOptions) -> Self {
        match parse_path(path, Some(options)) {
            Ok(node) => merge_into(&mut self.eager, node),
            Err(err) => {
                self.deferred_error.get_or_insert(err.to_string());
            }
        }
        self
    }

    /// Include soft-deleted documents
    pub fn with_trashed(mut self) -> Self {
        self.trashed = TrashedMode::WithTrashed;
        self
    }

    /// Only soft-deleted documents
    pub fn only_trashed(mut self) -> Self {
        self.trashed = TrashedMode::OnlyTrashed;
        self
    }

    pub fn trashed(mut self, mode: TrashedMode) -> Self {
        self.trashed = mode;
        self
    }

    pub fn trashed_mode(&self) -> TrashedMode {
        self.trashed
    }

    /// Return only these fields (plus eager-loaded aliases)
    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select_fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Drop these fields from results
    pub fn exclude(mut self, fields: &[&str]) -> Self {
        self.exclude_fields.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    /// Add ORDER BY clause
    pub fn order_by(mut self, column: &str, direction: SortDirection) -> Self {
        self.order_by.push(OrderByClause {
            column: column.to_string(),
            direction,
            case_sensitive: true,
        });
        self
    }

    /// Add ORDER BY DESC clause
    pub fn order_by_desc(self, column: &str) -> Self {
        self.order_by(column, SortDirection::Desc)
    }

    /// Order by a string column after folding case
    pub fn order_by_case_insensitive(mut self, column: &str, direction: SortDirection) -> Self {
        self.order_by.push(OrderByClause {
            column: column.to_string(),
            direction,
            case_sensitive: false,
        });
        self
    }

    /// The requested eager-load tree
    pub fn eager_loads(&self) -> &[EagerLoad] {
        &self.eager
    }

    pub(crate) fn check_deferred(&self) -> ModelResult<()> {
        match &self.deferred_error {
            Some(message) => Err(ModelError::Query(message.clone())),
            None => Ok(()),
        }
    }

    fn ordering_stages(&self) -> Vec<Stage> {
        if self.order_by.is_empty() {
            return Vec::new();
        }

        let mut folded = Map::new();
        let mut keys = Vec::with_capacity(self.order_by.len());
        for (idx, clause) in self.order_by.iter().enumerate() {
            if clause.case_sensitive {
                keys.push((clause.column.clone(), clause.direction.as_i32()));
            } else {
                let key = format!("{}{}", ORDER_KEY_PREFIX, idx);
                folded.insert(key.clone(), json!({ "$toLower": format!("${}", clause.column) }));
                keys.push((key, clause.direction.as_i32()));
            }
        }

        if folded.is_empty() {
            return vec![Stage::sort(keys)];
        }
        let temporary: Vec<String> = folded.keys().cloned().collect();
        vec![
            Stage::add_fields(folded),
            Stage::sort(keys),
            Stage::exclude(temporary),
        ]
    }

    fn window_stages(&self) -> Vec<Stage> {
        let mut stages = self.ordering_stages();
        if let Some(n) = self.skip_count {
            stages.push(Stage::skip(n));
        }
        if let Some(n) = self.limit_count {
            stages.push(Stage::limit(n));
        }
        stages
    }

    fn projection_stage(&self, aliases: &[EagerAlias]) -> Option<Stage> {
        if let Some(fields) = &self.select_fields {
            let mut spec = Map::new();
            for field in fields {
                spec.insert(field.clone(), Value::from(1));
            }
            for alias in aliases {
                spec.insert(alias.alias.clone(), Value::from(1));
            }
            return Some(Stage::project(spec));
        }
        if self.exclude_fields.is_empty() {
            None
        } else {
            Some(Stage::exclude(self.exclude_fields.iter().cloned()))
        }
    }

    /// Whether a predicate or sort column reads an eager-loaded alias
    fn reads_alias(&self, aliases: &[EagerAlias]) -> bool {
        let root_of = |column: &str| column.split('.').next().unwrap_or("").to_string();
        self.predicate_columns()
            .map(root_of)
            .chain(self.order_by.iter().map(|o| root_of(&o.column)))
            .any(|root| aliases.iter().any(|a| a.alias == root))
    }
}

impl<M: Model> QueryBuilder<M> {
    fn compiled_eager(&self) -> ModelResult<CompiledEager> {
        compile_eager(&ModelMeta::of::<M>(), &self.eager)
    }

    /// Stages shared by every read: soft-delete match, predicates and, when
    /// predicates reference them, the eager lookups.
    fn base_stages(&self, compiled: &CompiledEager, with_window: bool, with_eager: bool) -> ModelResult<Vec<Stage>> {
        self.check_deferred()?;
        let mut stages = Vec::new();
        if let Some(stage) = SoftDeletePolicy::for_model::<M>(self.trashed).root_stage() {
            stages.push(stage);
        }
        stages.extend(filter_document(&self.scope)?.map(Stage::match_filter));

        let filter = filter_document(&self.conditions)?.map(Stage::match_filter);
        let window = if with_window { self.window_stages() } else { Vec::new() };

        if self.reads_alias(&compiled.aliases) {
            stages.extend(compiled.stages.iter().cloned());
            stages.extend(filter);
            stages.extend(window);
        } else {
            stages.extend(filter);
            stages.extend(window);
            if with_eager {
                stages.extend(compiled.stages.iter().cloned());
            }
        }
        Ok(stages)
    }

    pub(crate) fn read_plan(&self) -> ModelResult<ReadPlan> {
        let compiled = self.compiled_eager()?;
        let mut stages = self.base_stages(&compiled, true, true)?;
        stages.extend(self.projection_stage(&compiled.aliases));
        Ok(ReadPlan {
            stages,
            aliases: compiled.aliases,
        })
    }

    /// Stages for reads that only need matching documents, not eager data
    pub(crate) fn filter_stages(&self) -> ModelResult<Vec<Stage>> {
        let compiled = self.compiled_eager()?;
        self.base_stages(&compiled, false, false)
    }

    /// The exact pipeline `get` would send
    pub fn to_pipeline(&self) -> ModelResult<Vec<Stage>> {
        Ok(self.read_plan()?.stages)
    }
}
