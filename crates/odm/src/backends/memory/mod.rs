//! In-memory document store
//!
//! A process-local implementation of [`DocumentDatabase`] that executes the
//! same aggregation pipelines a server-side store would. Used by the test
//! suite and handy for prototyping. Every mutating call that touches at least
//! one document bumps a write counter, so callers can assert how many writes
//! an operation really issued.

mod expression;
mod matcher;
mod pipeline;
mod values;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};

use self::matcher::matches;
use self::pipeline::PipelineExecutor;
use self::values::{remove_path, set_path, values_equal};
use crate::backends::{Document, DocumentCollection, DocumentDatabase, UpdateOutcome};
use crate::error::{ModelError, ModelResult};
use crate::model::{DocumentId, IntoDocumentId};
use crate::query::Stage;

type Store = Arc<RwLock<HashMap<String, Vec<Document>>>>;

/// Shared in-memory database; clones share the same storage
#[derive(Clone)]
pub struct MemoryDatabase {
    name: String,
    store: Store,
    writes: Arc<AtomicU64>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store: Arc::new(RwLock::new(HashMap::new())),
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of write operations that changed stored data
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reset_write_count(&self) {
        self.writes.store(0, Ordering::SeqCst);
    }

    /// Snapshot of a collection's raw documents
    pub fn dump(&self, collection: &str) -> Vec<Document> {
        self.store
            .read()
            .map(|store| store.get(collection).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Typed handle, for callers that want the concrete collection
    pub fn memory_collection(&self, name: &str) -> MemoryCollection {
        MemoryCollection {
            name: name.to_string(),
            store: Arc::clone(&self.store),
            writes: Arc::clone(&self.writes),
        }
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new(crate::config::OdmConfig::global().database.clone())
    }
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDatabase")
            .field("name", &self.name)
            .field("writes", &self.write_count())
            .finish()
    }
}

#[async_trait]
impl DocumentDatabase for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection> {
        Arc::new(self.memory_collection(name))
    }

    async fn health_check(&self) -> ModelResult<Duration> {
        let started = Instant::now();
        let _guard = self
            .store
            .read()
            .map_err(|_| ModelError::database("memory store lock poisoned"))?;
        Ok(started.elapsed())
    }
}

/// Collection handle over a [`MemoryDatabase`]
#[derive(Clone)]
pub struct MemoryCollection {
    name: String,
    store: Store,
    writes: Arc<AtomicU64>,
}

fn lock_error() -> ModelError {
    ModelError::database("memory store lock poisoned")
}

fn update_parts(update: &Value) -> ModelResult<(Option<&Map<String, Value>>, Option<&Map<String, Value>>, Option<&Map<String, Value>>)> {
    let Value::Object(ops) = update else {
        return Err(ModelError::Query("update must be an object".to_string()));
    };
    for key in ops.keys() {
        if !matches!(key.as_str(), "$set" | "$unset" | "$setOnInsert") {
            return Err(ModelError::Query(format!("unsupported update operator '{}'", key)));
        }
    }
    let part = |name: &str| -> ModelResult<Option<&Map<String, Value>>> {
        match ops.get(name) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(_) => Err(ModelError::Query(format!("{} requires an object", name))),
        }
    };
    Ok((part("$set")?, part("$unset")?, part("$setOnInsert")?))
}

/// Apply `$set`/`$unset`; returns whether the document changed
fn apply_update(doc: &mut Document, set: Option<&Map<String, Value>>, unset: Option<&Map<String, Value>>) -> bool {
    let before = Value::Object(doc.clone());
    if let Some(set) = set {
        for (path, value) in set {
            set_path(doc, path, value.clone());
        }
    }
    if let Some(unset) = unset {
        let mut wrapped = Value::Object(std::mem::take(doc));
        for path in unset.keys() {
            remove_path(&mut wrapped, path);
        }
        if let Value::Object(map) = wrapped {
            *doc = map;
        }
    }
    before != Value::Object(doc.clone())
}

/// Plain equality fields of a filter, used to seed an upserted document
fn equality_fields(filter: &Value) -> Document {
    let mut seed = Map::new();
    if let Value::Object(map) = filter {
        for (key, value) in map {
            if key.starts_with('$') {
                continue;
            }
            match value {
                Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    if let Some(eq) = ops.get("$eq") {
                        set_path(&mut seed, key, eq.clone());
                    }
                }
                other => set_path(&mut seed, key, other.clone()),
            }
        }
    }
    seed
}

impl MemoryCollection {
    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn prepare(document: Document, existing: &[Document]) -> ModelResult<(DocumentId, Document)> {
        let mut document = document;
        let id = match document.get("_id") {
            Some(value) => value.into_document_id()?,
            None => DocumentId::new(),
        };
        document.insert("_id".to_string(), id.to_value());
        let taken = existing
            .iter()
            .any(|doc| doc.get("_id").map(|v| values_equal(v, &id.to_value())).unwrap_or(false));
        if taken {
            return Err(ModelError::database(format!("duplicate _id '{}'", id)));
        }
        Ok((id, document))
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn aggregate(&self, pipeline: Vec<Stage>) -> ModelResult<Vec<Document>> {
        let stages: Vec<Value> = pipeline.into_iter().map(Stage::into_value).collect();
        tracing::trace!(collection = %self.name, stages = stages.len(), "aggregate");
        let store = self.store.read().map_err(|_| lock_error())?;
        PipelineExecutor::new(&store).run_on(&self.name, &stages)
    }

    async fn insert_one(&self, document: Document) -> ModelResult<DocumentId> {
        let mut store = self.store.write().map_err(|_| lock_error())?;
        let docs = store.entry(self.name.clone()).or_default();
        let (id, document) = Self::prepare(document, docs)?;
        docs.push(document);
        self.record_write();
        tracing::trace!(collection = %self.name, id = %id, "insert_one");
        Ok(id)
    }

    async fn insert_many(&self, documents: Vec<Document>) -> ModelResult<Vec<DocumentId>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let mut store = self.store.write().map_err(|_| lock_error())?;
        let docs = store.entry(self.name.clone()).or_default();
        let mut staged: Vec<Document> = Vec::with_capacity(documents.len());
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            let seen: Vec<Document> = docs.iter().chain(staged.iter()).cloned().collect();
            let (id, document) = Self::prepare(document, &seen)?;
            ids.push(id);
            staged.push(document);
        }
        docs.extend(staged);
        self.record_write();
        tracing::trace!(collection = %self.name, count = ids.len(), "insert_many");
        Ok(ids)
    }

    async fn update_many(&self, filter: Value, update: Value) -> ModelResult<UpdateOutcome> {
        let (set, unset, _) = update_parts(&update)?;
        let mut store = self.store.write().map_err(|_| lock_error())?;
        let mut outcome = UpdateOutcome::default();
        if let Some(docs) = store.get_mut(&self.name) {
            for doc in docs.iter_mut() {
                if !matches(&Value::Object(doc.clone()), &filter)? {
                    continue;
                }
                outcome.matched += 1;
                if apply_update(doc, set, unset) {
                    outcome.modified += 1;
                }
            }
        }
        if outcome.modified > 0 {
            self.record_write();
        }
        tracing::trace!(collection = %self.name, matched = outcome.matched, modified = outcome.modified, "update_many");
        Ok(outcome)
    }

    async fn upsert_one(&self, filter: Value, update: Value) -> ModelResult<UpdateOutcome> {
        let (set, unset, on_insert) = update_parts(&update)?;
        let mut store = self.store.write().map_err(|_| lock_error())?;
        let docs = store.entry(self.name.clone()).or_default();

        let mut target = None;
        for (idx, doc) in docs.iter().enumerate() {
            if matches(&Value::Object(doc.clone()), &filter)? {
                target = Some(idx);
                break;
            }
        }

        let outcome = match target {
            Some(idx) => {
                let changed = apply_update(&mut docs[idx], set, unset);
                if changed {
                    self.record_write();
                }
                UpdateOutcome {
                    matched: 1,
                    modified: u64::from(changed),
                    upserted_id: None,
                }
            }
            None => {
                let mut seed = equality_fields(&filter);
                if let Some(on_insert) = on_insert {
                    for (path, value) in on_insert {
                        set_path(&mut seed, path, value.clone());
                    }
                }
                apply_update(&mut seed, set, unset);
                let (id, document) = Self::prepare(seed, docs)?;
                docs.push(document);
                self.record_write();
                UpdateOutcome {
                    matched: 0,
                    modified: 0,
                    upserted_id: Some(id),
                }
            }
        };
        tracing::trace!(collection = %self.name, upserted = outcome.was_upserted(), "upsert_one");
        Ok(outcome)
    }

    async fn delete_many(&self, filter: Value) -> ModelResult<u64> {
        let mut store = self.store.write().map_err(|_| lock_error())?;
        let Some(docs) = store.get_mut(&self.name) else {
            return Ok(0);
        };
        let before = docs.len();
        let mut kept = Vec::with_capacity(before);
        for doc in docs.drain(..) {
            if !matches(&Value::Object(doc.clone()), &filter)? {
                kept.push(doc);
            }
        }
        *docs = kept;
        let removed = (before - docs.len()) as u64;
        if removed > 0 {
            self.record_write();
        }
        tracing::trace!(collection = %self.name, removed, "delete_many");
        Ok(removed)
    }
}
