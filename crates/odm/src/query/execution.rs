//! Query Execution - terminal operations
//!
//! Reads never fail for "no rows": `first` returns `None`, aggregates return
//! zero and `get` an empty vector. Only `first_or_fail` raises `NotFound`.

use serde_json::{json, Map, Value};

use super::builder::QueryBuilder;
use super::pagination::{page_window, Paginated};
use super::stage::{pipeline_to_value, Stage};
use crate::backends::DocumentDatabase;
use crate::error::{ModelError, ModelResult};
use crate::model::{Entity, Model};

/// Accumulators supported by [`QueryBuilder::aggregate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregate {
    fn operator(self) -> &'static str {
        match self {
            Aggregate::Sum => "$sum",
            Aggregate::Avg => "$avg",
            Aggregate::Min => "$min",
            Aggregate::Max => "$max",
        }
    }
}

impl<M: Model> QueryBuilder<M> {
    /// Execute the query and return the matching entities
    pub async fn get(&self, db: &dyn DocumentDatabase) -> ModelResult<Vec<Entity<M>>> {
        let plan = self.read_plan()?;
        tracing::debug!(
            collection = M::collection_name(),
            pipeline = %pipeline_to_value(&plan.stages),
            "get"
        );
        let documents = db.collection(M::collection_name()).aggregate(plan.stages).await?;
        Ok(documents
            .into_iter()
            .map(|doc| Entity::from_document(doc, &plan.aliases))
            .collect())
    }

    /// Same as [`get`](Self::get)
    pub async fn all(&self, db: &dyn DocumentDatabase) -> ModelResult<Vec<Entity<M>>> {
        self.get(db).await
    }

    /// First matching entity, or `None`
    pub async fn first(&self, db: &dyn DocumentDatabase) -> ModelResult<Option<Entity<M>>> {
        let results = self.clone().limit(1).get(db).await?;
        Ok(results.into_iter().next())
    }

    /// First matching entity, or [`ModelError::NotFound`]
    pub async fn first_or_fail(&self, db: &dyn DocumentDatabase) -> ModelResult<Entity<M>> {
        self.first(db)
            .await?
            .ok_or_else(|| ModelError::NotFound(M::collection_name().to_string()))
    }

    /// Number of matching documents
    pub async fn count(&self, db: &dyn DocumentDatabase) -> ModelResult<u64> {
        let mut stages = self.filter_stages()?;
        stages.push(Stage::count("count"));
        tracing::debug!(
            collection = M::collection_name(),
            pipeline = %pipeline_to_value(&stages),
            "count"
        );
        let documents = db.collection(M::collection_name()).aggregate(stages).await?;
        Ok(documents
            .first()
            .and_then(|doc| doc.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    pub async fn exists(&self, db: &dyn DocumentDatabase) -> ModelResult<bool> {
        Ok(self.count(db).await? > 0)
    }

    /// Numeric aggregate over `column`; non-numeric values are ignored and
    /// an empty match yields `0.0`
    pub async fn aggregate(
        &self,
        db: &dyn DocumentDatabase,
        column: &str,
        aggregate: Aggregate,
    ) -> ModelResult<f64> {
        let mut stages = self.filter_stages()?;
        let mut numeric = Map::new();
        numeric.insert(column.to_string(), json!({ "$type": "number" }));
        stages.push(Stage::match_filter(Value::Object(numeric)));

        let mut group = Map::new();
        group.insert("_id".to_string(), Value::Null);
        let mut accumulator = Map::new();
        accumulator.insert(
            aggregate.operator().to_string(),
            Value::String(format!("${}", column)),
        );
        group.insert("value".to_string(), Value::Object(accumulator));
        stages.push(Stage::group(group));

        tracing::debug!(
            collection = M::collection_name(),
            pipeline = %pipeline_to_value(&stages),
            "aggregate"
        );
        let documents = db.collection(M::collection_name()).aggregate(stages).await?;
        Ok(documents
            .first()
            .and_then(|doc| doc.get("value"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0))
    }

    pub async fn sum(&self, db: &dyn DocumentDatabase, column: &str) -> ModelResult<f64> {
        self.aggregate(db, column, Aggregate::Sum).await
    }

    pub async fn avg(&self, db: &dyn DocumentDatabase, column: &str) -> ModelResult<f64> {
        self.aggregate(db, column, Aggregate::Avg).await
    }

    pub async fn min(&self, db: &dyn DocumentDatabase, column: &str) -> ModelResult<f64> {
        self.aggregate(db, column, Aggregate::Min).await
    }

    pub async fn max(&self, db: &dyn DocumentDatabase, column: &str) -> ModelResult<f64> {
        self.aggregate(db, column, Aggregate::Max).await
    }

    /// Values of `column` across the matches, skipping documents without it
    pub async fn pluck(&self, db: &dyn DocumentDatabase, column: &str) -> ModelResult<Vec<Value>> {
        let entities = self.get(db).await?;
        Ok(entities
            .iter()
            .filter_map(|entity| entity.value_at(column).cloned())
            .collect())
    }

    /// One page of results plus the total match count (two round trips)
    pub async fn paginate(
        &self,
        db: &dyn DocumentDatabase,
        page: u64,
        per_page: u64,
    ) -> ModelResult<Paginated<Entity<M>>> {
        let (skip, limit) = page_window(page as i64, per_page as i64)?;
        let total = self.count(db).await?;
        let data = self.clone().skip(skip).limit(limit).get(db).await?;
        Ok(Paginated::new(data, total, page, per_page))
    }
}
