//! Soft-delete visibility
//!
//! A soft-deleting collection marks removed documents with a boolean field
//! instead of deleting them. Reads filter on that field according to a
//! [`TrashedMode`]; the root query and every joined collection apply their
//! own policy independently.

use serde_json::{json, Map, Value};

use crate::model::{Model, ModelMeta};
use crate::query::Stage;

/// Which documents a read sees with respect to soft deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TrashedMode {
    /// Only documents that are not soft-deleted
    #[default]
    Default,
    /// Every document
    WithTrashed,
    /// Only soft-deleted documents
    OnlyTrashed,
}

impl TrashedMode {
    /// Marker value the filter requires, `None` when no filter applies
    fn required_marker(self) -> Option<bool> {
        match self {
            TrashedMode::Default => Some(false),
            TrashedMode::OnlyTrashed => Some(true),
            TrashedMode::WithTrashed => None,
        }
    }
}

/// Soft-delete configuration of one collection combined with a visibility mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDeletePolicy {
    field: Option<String>,
    mode: TrashedMode,
}

impl SoftDeletePolicy {
    /// `field` is `None` for collections without soft deletes
    pub fn new(field: Option<String>, mode: TrashedMode) -> Self {
        Self { field, mode }
    }

    pub fn for_model<M: Model>(mode: TrashedMode) -> Self {
        let field = M::uses_soft_deletes().then(|| M::soft_delete_field().to_string());
        Self::new(field, mode)
    }

    pub fn for_meta(meta: &ModelMeta, mode: TrashedMode) -> Self {
        Self::new(meta.soft_delete_field.map(str::to_string), mode)
    }

    pub fn mode(&self) -> TrashedMode {
        self.mode
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// Plain filter document, `{ isDeleted: false }` in the default mode
    pub fn filter(&self) -> Option<Value> {
        let field = self.field.as_ref()?;
        let marker = self.mode.required_marker()?;
        let mut filter = Map::new();
        filter.insert(field.clone(), Value::Bool(marker));
        Some(Value::Object(filter))
    }

    /// Expression form used inside `$lookup` sub-pipelines
    pub fn expr_condition(&self) -> Option<Value> {
        let field = self.field.as_ref()?;
        let marker = self.mode.required_marker()?;
        Some(json!({ "$eq": [format!("${}", field), marker] }))
    }

    /// `$match` stage for a root query
    pub fn root_stage(&self) -> Option<Stage> {
        self.filter().map(Stage::match_filter)
    }
}
