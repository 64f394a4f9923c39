//! Core Document Store Traits
//!
//! These traits abstract the document store the ODM talks to. The ODM only
//! decides *what* to send: aggregation pipelines for reads and filter/update
//! documents for writes. Connection management, retries and timeouts belong
//! to the implementor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::ModelResult;
use crate::model::DocumentId;
use crate::query::Stage;

/// A stored document
pub type Document = Map<String, Value>;

/// Outcome of an update or upsert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Documents matched by the filter
    pub matched: u64,
    /// Documents whose content actually changed
    pub modified: u64,
    /// Identifier of the document inserted by an upsert
    pub upserted_id: Option<DocumentId>,
}

impl UpdateOutcome {
    pub fn was_upserted(&self) -> bool {
        self.upserted_id.is_some()
    }
}

/// Handle to a single collection
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    /// Collection name
    fn name(&self) -> &str;

    /// Run an aggregation pipeline and return the resulting documents
    async fn aggregate(&self, pipeline: Vec<Stage>) -> ModelResult<Vec<Document>>;

    /// Insert one document, assigning an `_id` when absent
    async fn insert_one(&self, document: Document) -> ModelResult<DocumentId>;

    /// Insert several documents
    async fn insert_many(&self, documents: Vec<Document>) -> ModelResult<Vec<DocumentId>>;

    /// Apply an update document (`$set` / `$unset`) to every match
    async fn update_many(&self, filter: Value, update: Value) -> ModelResult<UpdateOutcome>;

    /// Conditional single-document write: apply `$set` to the first match, or
    /// insert the filter's equality fields merged with `$set` and `$setOnInsert`
    /// when nothing matches.
    async fn upsert_one(&self, filter: Value, update: Value) -> ModelResult<UpdateOutcome>;

    /// Remove every matching document, returning the number removed
    async fn delete_many(&self, filter: Value) -> ModelResult<u64>;
}

/// Handle to a database holding named collections
#[async_trait]
pub trait DocumentDatabase: Send + Sync {
    /// Database name
    fn name(&self) -> &str;

    /// Obtain a handle to a collection
    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection>;

    /// Round-trip check against the store
    async fn health_check(&self) -> ModelResult<Duration>;
}
