//! Pivot Reconciler - attach, detach, sync and toggle for many-to-many kinds
//!
//! Every operation runs in three steps: read the owner's pivot rows into a
//! [`PivotSnapshot`], compute a [`PivotPlan`] from the snapshot and the
//! requested ids, then apply the plan. Inserts and restores are one
//! conditional upsert per target (insert when absent, clear the soft-delete
//! marker otherwise); removals are a single hard delete.
//!
//! The read and the writes are separate round trips and are not isolated.
//! Two reconciliations racing on the same owner can both plan an insert for
//! the same target; the upsert filter keeps the second one from duplicating
//! the row, but a removal planned from a stale snapshot can still undo a
//! concurrent attach.

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::compiler::pivot_conditions;
use super::metadata::{PivotKeys, PivotSoftDelete};
use super::query::kinds::{BelongsToManyKind, PivotKind};
use super::query::{single_field, RelationQuery};
use crate::backends::{Document, DocumentDatabase};
use crate::error::{ModelError, ModelResult};
use crate::model::lifecycle::timestamp;
use crate::model::{normalize_ids, DocumentId, IntoDocumentId, Model};
use crate::query::Stage;

/// What a reconciliation changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PivotChanges {
    /// Targets that got a new pivot row
    pub attached: Vec<DocumentId>,
    /// Targets whose soft-deleted row was revived
    pub restored: Vec<DocumentId>,
    /// Targets whose rows were removed
    pub detached: Vec<DocumentId>,
}

impl PivotChanges {
    pub fn is_empty(&self) -> bool {
        self.attached.is_empty() && self.restored.is_empty() && self.detached.is_empty()
    }
}

/// Pivot rows of one owner, split by soft-delete state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PivotSnapshot {
    pub active: Vec<DocumentId>,
    pub trashed: Vec<DocumentId>,
}

impl PivotSnapshot {
    pub fn is_active(&self, id: &DocumentId) -> bool {
        self.active.contains(id)
    }

    pub fn is_trashed(&self, id: &DocumentId) -> bool {
        !self.is_active(id) && self.trashed.contains(id)
    }

    /// Every target with a row, active or not
    pub fn all(&self) -> Vec<DocumentId> {
        let mut all = self.active.clone();
        all.extend(self.trashed.iter().filter(|id| !self.active.contains(id)));
        all
    }
}

/// Writes a reconciliation will issue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PivotPlan {
    pub insert: Vec<DocumentId>,
    pub restore: Vec<DocumentId>,
    pub delete: Vec<DocumentId>,
}

impl PivotPlan {
    /// Insert absent targets, restore soft-deleted ones
    pub fn attach(snapshot: &PivotSnapshot, ids: &[DocumentId]) -> Self {
        let mut plan = PivotPlan::default();
        for id in ids {
            if snapshot.is_active(id) {
                continue;
            }
            if snapshot.is_trashed(id) {
                plan.restore.push(*id);
            } else {
                plan.insert.push(*id);
            }
        }
        plan
    }

    /// Remove rows of the given targets, whatever their state
    pub fn detach(snapshot: &PivotSnapshot, ids: &[DocumentId]) -> Self {
        PivotPlan {
            delete: snapshot.all().into_iter().filter(|id| ids.contains(id)).collect(),
            ..PivotPlan::default()
        }
    }

    /// Attach `ids`; with `detaching`, also remove every other row
    pub fn sync(snapshot: &PivotSnapshot, ids: &[DocumentId], detaching: bool) -> Self {
        let mut plan = Self::attach(snapshot, ids);
        if detaching {
            plan.delete = snapshot.all().into_iter().filter(|id| !ids.contains(id)).collect();
        }
        plan
    }

    /// Flip presence of each target
    pub fn toggle(snapshot: &PivotSnapshot, ids: &[DocumentId]) -> Self {
        let mut plan = PivotPlan::default();
        for id in ids {
            if snapshot.is_active(id) {
                plan.delete.push(*id);
            } else if snapshot.is_trashed(id) {
                plan.restore.push(*id);
            } else {
                plan.insert.push(*id);
            }
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.restore.is_empty() && self.delete.is_empty()
    }
}

/// Reads and writes the pivot rows of one owner
pub struct PivotReconciler<'a> {
    db: &'a dyn DocumentDatabase,
    keys: &'a PivotKeys,
    owner: Value,
}

impl<'a> PivotReconciler<'a> {
    pub fn new(db: &'a dyn DocumentDatabase, keys: &'a PivotKeys, owner: Value) -> Self {
        Self { db, keys, owner }
    }

    /// Filter selecting every row of the owner
    fn owner_filter(&self) -> Map<String, Value> {
        let mut filter = Map::new();
        filter.insert(self.keys.foreign_pivot_key.clone(), self.owner.clone());
        if let Some((type_field, type_name)) = &self.keys.morph_type {
            filter.insert(type_field.clone(), Value::String(type_name.clone()));
        }
        filter
    }

    fn target_filter(&self, id: &DocumentId) -> Value {
        let mut filter = self.owner_filter();
        filter.insert(self.keys.related_pivot_key.clone(), id.to_value());
        Value::Object(filter)
    }

    pub async fn snapshot(&self) -> ModelResult<PivotSnapshot> {
        let stages = vec![Stage::match_filter(Value::Object(self.owner_filter()))];
        let rows = self.db.collection(&self.keys.collection).aggregate(stages).await?;

        let mut snapshot = PivotSnapshot::default();
        for row in rows {
            let Some(id) = row
                .get(&self.keys.related_pivot_key)
                .and_then(|v| v.into_document_id().ok())
            else {
                tracing::warn!(
                    collection = %self.keys.collection,
                    "pivot row without a usable '{}'",
                    self.keys.related_pivot_key
                );
                continue;
            };
            let trashed = self
                .keys
                .soft_delete
                .as_ref()
                .map(|soft| row.get(&soft.field) == Some(&Value::Bool(true)))
                .unwrap_or(false);
            let bucket = if trashed { &mut snapshot.trashed } else { &mut snapshot.active };
            if !bucket.contains(&id) {
                bucket.push(id);
            }
        }
        Ok(snapshot)
    }

    /// Upsert body: revive when present, seed `extra` and timestamps when absent.
    /// Never contains an empty operator document.
    fn attach_update(&self, id: &DocumentId, extra: &Document) -> Value {
        let mut on_insert = Map::new();
        for (key, value) in extra {
            let reserved = *key == self.keys.foreign_pivot_key
                || *key == self.keys.related_pivot_key
                || self.keys.soft_delete.as_ref().map(|s| s.field == *key).unwrap_or(false);
            if !reserved {
                on_insert.insert(key.clone(), value.clone());
            }
        }
        if let Some((created_at, updated_at)) = &self.keys.timestamps {
            let now = timestamp();
            on_insert.insert(created_at.clone(), now.clone());
            on_insert.insert(updated_at.clone(), now);
        }

        let mut update = Map::new();
        if let Some(PivotSoftDelete { field, deleted_at_field }) = &self.keys.soft_delete {
            update.insert("$set".to_string(), single_field(field, Value::Bool(false)));
            if let Some(deleted_at) = deleted_at_field {
                update.insert("$unset".to_string(), single_field(deleted_at, Value::String(String::new())));
            }
        }
        if !on_insert.is_empty() {
            update.insert("$setOnInsert".to_string(), Value::Object(on_insert));
        } else if update.is_empty() {
            update.insert("$setOnInsert".to_string(), self.target_filter(id));
        }
        Value::Object(update)
    }

    pub async fn apply(&self, plan: &PivotPlan, extra: &Document) -> ModelResult<PivotChanges> {
        let collection = self.db.collection(&self.keys.collection);
        let mut changes = PivotChanges::default();

        if !plan.insert.is_empty() || !plan.restore.is_empty() {
            for id in plan.insert.iter().chain(plan.restore.iter()) {
                let update = self.attach_update(id, extra);
                let outcome = collection.upsert_one(self.target_filter(id), update).await?;
                if outcome.was_upserted() {
                    changes.attached.push(*id);
                } else if outcome.modified > 0 {
                    changes.restored.push(*id);
                }
            }
        }

        if !plan.delete.is_empty() {
            let mut filter = self.owner_filter();
            let ids: Vec<Value> = plan.delete.iter().map(DocumentId::to_value).collect();
            filter.insert(self.keys.related_pivot_key.clone(), json!({ "$in": ids }));
            collection.delete_many(Value::Object(filter)).await?;
            changes.detached = plan.delete.clone();
        }

        Ok(changes)
    }

    /// Remove every row of the owner
    pub async fn clear(&self) -> ModelResult<u64> {
        self.db
            .collection(&self.keys.collection)
            .delete_many(Value::Object(self.owner_filter()))
            .await
    }
}

/// Normalize ids, dropping repeats
fn target_ids<I, T>(relation: &str, ids: I) -> ModelResult<Vec<DocumentId>>
where
    I: IntoIterator<Item = T>,
    T: IntoDocumentId,
{
    let normalized = normalize_ids(ids)?;
    let mut unique = Vec::with_capacity(normalized.len());
    for id in normalized {
        if unique.contains(&id) {
            tracing::warn!(relation, id = %id, "duplicate id ignored");
        } else {
            unique.push(id);
        }
    }
    Ok(unique)
}

fn extra_attributes(extra: Value) -> ModelResult<Document> {
    match extra {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(ModelError::InvalidArgument(format!(
            "pivot attributes must be an object, got {}",
            other
        ))),
    }
}

impl<O: Model, R: Model, K: PivotKind> RelationQuery<O, R, K> {
    fn reconciler<'a>(&'a self, db: &'a dyn DocumentDatabase) -> ModelResult<PivotReconciler<'a>> {
        let keys = self.descriptor().pivot().ok_or_else(|| {
            ModelError::Query(format!("'{}' has no pivot collection", self.descriptor().name))
        })?;
        let owner = self.require_owner_value(&keys.parent_key)?;
        Ok(PivotReconciler::new(db, keys, owner))
    }

    async fn reconcile<F>(
        &self,
        db: &dyn DocumentDatabase,
        operation: &'static str,
        ids: Vec<DocumentId>,
        extra: Document,
        plan: F,
    ) -> ModelResult<PivotChanges>
    where
        F: FnOnce(&PivotSnapshot, &[DocumentId]) -> PivotPlan,
    {
        let reconciler = self.reconciler(db)?;
        let snapshot = reconciler.snapshot().await?;
        let plan = plan(&snapshot, &ids);
        let changes = reconciler.apply(&plan, &extra).await?;
        tracing::info!(
            model = O::type_name(),
            relation = %self.descriptor().name,
            operation,
            attached = changes.attached.len(),
            restored = changes.restored.len(),
            detached = changes.detached.len(),
            "pivot reconciled"
        );
        Ok(changes)
    }

    /// The owner's current pivot rows
    pub async fn pivot_snapshot(&self, db: &dyn DocumentDatabase) -> ModelResult<PivotSnapshot> {
        self.reconciler(db)?.snapshot().await
    }

    /// Associate `ids`; soft-deleted rows are revived, active ones left alone
    pub async fn attach<I, T>(&self, db: &dyn DocumentDatabase, ids: I) -> ModelResult<PivotChanges>
    where
        I: IntoIterator<Item = T>,
        T: IntoDocumentId,
    {
        self.attach_with(db, ids, Value::Null).await
    }

    /// [`attach`](Self::attach) with extra attributes for newly inserted rows
    pub async fn attach_with<I, T>(
        &self,
        db: &dyn DocumentDatabase,
        ids: I,
        extra: Value,
    ) -> ModelResult<PivotChanges>
    where
        I: IntoIterator<Item = T>,
        T: IntoDocumentId,
    {
        let ids = target_ids(&self.descriptor().name, ids)?;
        self.reconcile(db, "attach", ids, extra_attributes(extra)?, PivotPlan::attach)
            .await
    }

    /// Hard-delete the rows of `ids`
    pub async fn detach<I, T>(&self, db: &dyn DocumentDatabase, ids: I) -> ModelResult<PivotChanges>
    where
        I: IntoIterator<Item = T>,
        T: IntoDocumentId,
    {
        let ids = target_ids(&self.descriptor().name, ids)?;
        self.reconcile(db, "detach", ids, Map::new(), PivotPlan::detach).await
    }

    /// Hard-delete every row of the owner
    pub async fn detach_all(&self, db: &dyn DocumentDatabase) -> ModelResult<PivotChanges> {
        let reconciler = self.reconciler(db)?;
        let snapshot = reconciler.snapshot().await?;
        let removed = reconciler.clear().await?;
        tracing::info!(
            model = O::type_name(),
            relation = %self.descriptor().name,
            removed,
            "pivot cleared"
        );
        Ok(PivotChanges {
            detached: snapshot.all(),
            ..PivotChanges::default()
        })
    }

    /// Make the owner's associations exactly `ids`
    pub async fn sync<I, T>(&self, db: &dyn DocumentDatabase, ids: I) -> ModelResult<PivotChanges>
    where
        I: IntoIterator<Item = T>,
        T: IntoDocumentId,
    {
        self.sync_with(db, ids, Value::Null).await
    }

    pub async fn sync_with<I, T>(
        &self,
        db: &dyn DocumentDatabase,
        ids: I,
        extra: Value,
    ) -> ModelResult<PivotChanges>
    where
        I: IntoIterator<Item = T>,
        T: IntoDocumentId,
    {
        let ids = target_ids(&self.descriptor().name, ids)?;
        self.reconcile(db, "sync", ids, extra_attributes(extra)?, |snapshot, ids| {
            PivotPlan::sync(snapshot, ids, true)
        })
        .await
    }

    /// The attaching half of [`sync`](Self::sync)
    pub async fn sync_without_detaching<I, T>(
        &self,
        db: &dyn DocumentDatabase,
        ids: I,
    ) -> ModelResult<PivotChanges>
    where
        I: IntoIterator<Item = T>,
        T: IntoDocumentId,
    {
        self.sync_without_detaching_with(db, ids, Value::Null).await
    }

    /// [`sync_without_detaching`](Self::sync_without_detaching) with extra
    /// attributes for newly inserted rows
    pub async fn sync_without_detaching_with<I, T>(
        &self,
        db: &dyn DocumentDatabase,
        ids: I,
        extra: Value,
    ) -> ModelResult<PivotChanges>
    where
        I: IntoIterator<Item = T>,
        T: IntoDocumentId,
    {
        let ids = target_ids(&self.descriptor().name, ids)?;
        self.reconcile(db, "syncWithoutDetaching", ids, extra_attributes(extra)?, |snapshot, ids| {
            PivotPlan::sync(snapshot, ids, false)
        })
        .await
    }

    /// Detach active targets, attach or restore the others
    pub async fn toggle<I, T>(&self, db: &dyn DocumentDatabase, ids: I) -> ModelResult<PivotChanges>
    where
        I: IntoIterator<Item = T>,
        T: IntoDocumentId,
    {
        let ids = target_ids(&self.descriptor().name, ids)?;
        self.reconcile(db, "toggle", ids, Map::new(), PivotPlan::toggle).await
    }

    fn pivot_keys_mut(&mut self) -> Option<&mut PivotKeys> {
        self.descriptor_mut().pivot_mut()
    }

    /// Override the pivot collection name
    pub fn pivot_collection(mut self, collection: &str) -> Self {
        if let Some(pivot) = self.pivot_keys_mut() {
            pivot.collection = collection.to_string();
        }
        self
    }

    /// Override the pivot field referencing the owner
    pub fn foreign_pivot_key(mut self, key: &str) -> Self {
        if let Some(pivot) = self.pivot_keys_mut() {
            pivot.foreign_pivot_key = key.to_string();
        }
        self
    }

    /// Override the pivot field referencing the related document
    pub fn related_pivot_key(mut self, key: &str) -> Self {
        if let Some(pivot) = self.pivot_keys_mut() {
            pivot.related_pivot_key = key.to_string();
        }
        self
    }

    /// Override the owner field the pivot references
    pub fn parent_key(mut self, key: &str) -> Self {
        if let Some(pivot) = self.pivot_keys_mut() {
            pivot.parent_key = key.to_string();
        }
        self
    }

    /// Override the related field the pivot references
    pub fn related_key(mut self, key: &str) -> Self {
        if let Some(pivot) = self.pivot_keys_mut() {
            pivot.related_key = key.to_string();
        }
        self
    }

    /// Conditions a pivot row must satisfy to count as an association
    pub fn pivot_conditions(&self) -> Vec<Value> {
        self.descriptor().pivot().map(pivot_conditions).unwrap_or_default()
    }
}

impl<O: Model, R: Model> RelationQuery<O, R, BelongsToManyKind> {
    /// Use pivot model `P`: its collection, soft-delete and timestamp settings
    pub fn using<P: Model>(mut self) -> Self {
        if let Some(pivot) = self.pivot_keys_mut() {
            pivot.collection = P::collection_name().to_string();
            pivot.soft_delete = P::uses_soft_deletes().then(|| PivotSoftDelete {
                field: P::soft_delete_field().to_string(),
                deleted_at_field: Some(P::deleted_at_field().to_string()),
            });
            pivot.timestamps = P::uses_timestamps()
                .then(|| (P::created_at_field().to_string(), P::updated_at_field().to_string()));
        }
        self
    }
}
