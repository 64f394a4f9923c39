//! Relationship Metadata - descriptor values for declared relationships
//!
//! A [`RelationDescriptor`] captures everything needed to compile a
//! relationship into aggregation stages or to build its lazy query: the kind,
//! both sides' collection metadata, the key names for that kind, the alias
//! and the options bag. Descriptors are plain values; compiling never
//! changes them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModelError, ModelResult};
use crate::model::ModelMeta;
use crate::query::SortDirection;
use crate::soft_delete::TrashedMode;

/// Defines the type of relationship between models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    /// One-to-one, foreign key on the related side
    HasOne,
    /// Inverse of hasOne/hasMany, foreign key on the owner
    BelongsTo,
    /// One-to-many, foreign key on the related side
    HasMany,
    /// Many-to-many through a pivot collection
    BelongsToMany,
    /// Distant one-to-many through an intermediate collection
    HasManyThrough,
    /// Polymorphic one-to-one: the related side stores the owner's type and id
    MorphTo,
    /// Polymorphic one-to-many
    MorphMany,
    /// Polymorphic many-to-many, owner side
    MorphToMany,
    /// Polymorphic many-to-many, inverse side
    MorphedByMany,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 9] = [
        RelationshipType::HasOne,
        RelationshipType::BelongsTo,
        RelationshipType::HasMany,
        RelationshipType::BelongsToMany,
        RelationshipType::HasManyThrough,
        RelationshipType::MorphTo,
        RelationshipType::MorphMany,
        RelationshipType::MorphToMany,
        RelationshipType::MorphedByMany,
    ];

    /// Returns true if this relationship type is polymorphic
    pub fn is_polymorphic(self) -> bool {
        matches!(
            self,
            Self::MorphTo | Self::MorphMany | Self::MorphToMany | Self::MorphedByMany
        )
    }

    /// Returns true if this relationship resolves to a collection
    pub fn is_collection(self) -> bool {
        !self.is_single()
    }

    /// Returns true if this relationship resolves to at most one document
    pub fn is_single(self) -> bool {
        matches!(self, Self::HasOne | Self::BelongsTo | Self::MorphTo)
    }

    /// Returns true if this relationship goes through a pivot collection
    pub fn requires_pivot(self) -> bool {
        matches!(
            self,
            Self::BelongsToMany | Self::MorphToMany | Self::MorphedByMany
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HasOne => "hasOne",
            Self::BelongsTo => "belongsTo",
            Self::HasMany => "hasMany",
            Self::BelongsToMany => "belongsToMany",
            Self::HasManyThrough => "hasManyThrough",
            Self::MorphTo => "morphTo",
            Self::MorphMany => "morphMany",
            Self::MorphToMany => "morphToMany",
            Self::MorphedByMany => "morphedByMany",
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options bag recognized on relation handles and eager-load requests
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationOptions {
    /// Whitelist of related fields; wins over `exclude`
    pub select: Option<Vec<String>>,
    pub exclude: Vec<String>,
    /// Hidden fields to show anyway
    pub make_visible: Vec<String>,
    pub sort: Option<(String, SortDirection)>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// Trashed mode of the related side
    pub trashed: Option<TrashedMode>,
}

fn string_list(value: &Value, key: &str) -> ModelResult<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    ModelError::InvalidArgument(format!("'{}' entries must be strings", key))
                })
            })
            .collect(),
        _ => Err(ModelError::InvalidArgument(format!(
            "'{}' must be a string or an array of strings",
            key
        ))),
    }
}

fn count_option(value: &Value, key: &str) -> ModelResult<u64> {
    value.as_u64().ok_or_else(|| {
        ModelError::InvalidArgument(format!("'{}' must be a non-negative integer", key))
    })
}

impl RelationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn make_visible<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.make_visible.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn sort(mut self, column: &str, direction: SortDirection) -> Self {
        self.sort = Some((column.to_string(), direction));
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn with_trashed(mut self) -> Self {
        self.trashed = Some(TrashedMode::WithTrashed);
        self
    }

    pub fn only_trashed(mut self) -> Self {
        self.trashed = Some(TrashedMode::OnlyTrashed);
        self
    }

    /// Parse the JSON form
    /// `{ select, exclude, makeVisible, sort: [column, "asc"|"desc"], skip, limit }`
    pub fn from_value(value: &Value) -> ModelResult<Self> {
        let map = value.as_object().ok_or_else(|| {
            ModelError::InvalidArgument("relation options must be an object".to_string())
        })?;

        let mut options = RelationOptions::new();
        for (key, value) in map {
            match key.as_str() {
                "select" => options.select = Some(string_list(value, key)?),
                "exclude" => options.exclude = string_list(value, key)?,
                "makeVisible" => options.make_visible = string_list(value, key)?,
                "sort" => {
                    let parts = string_list(value, key)?;
                    let (column, direction) = match parts.as_slice() {
                        [column] => (column.clone(), SortDirection::Asc),
                        [column, direction] => (column.clone(), SortDirection::parse(direction)?),
                        _ => {
                            return Err(ModelError::InvalidArgument(
                                "'sort' must be [column] or [column, direction]".to_string(),
                            ))
                        }
                    };
                    options.sort = Some((column, direction));
                }
                "skip" => options.skip = Some(count_option(value, key)?),
                "limit" => options.limit = Some(count_option(value, key)?),
                "withTrashed" if value.as_bool() == Some(true) => {
                    options.trashed = Some(TrashedMode::WithTrashed)
                }
                "onlyTrashed" if value.as_bool() == Some(true) => {
                    options.trashed = Some(TrashedMode::OnlyTrashed)
                }
                "withTrashed" | "onlyTrashed" => {}
                other => {
                    return Err(ModelError::InvalidArgument(format!(
                        "unknown relation option '{}'",
                        other
                    )))
                }
            }
        }
        Ok(options)
    }

    /// Overlay `other` on top of `self`; set values in `other` win
    pub fn merged_with(&self, other: &RelationOptions) -> RelationOptions {
        let mut merged = self.clone();
        if other.select.is_some() {
            merged.select = other.select.clone();
        }
        merged.exclude.extend(other.exclude.iter().cloned());
        merged.make_visible.extend(other.make_visible.iter().cloned());
        if other.sort.is_some() {
            merged.sort = other.sort.clone();
        }
        if other.skip.is_some() {
            merged.skip = other.skip;
        }
        if other.limit.is_some() {
            merged.limit = other.limit;
        }
        if other.trashed.is_some() {
            merged.trashed = other.trashed;
        }
        merged
    }

    /// Fields hidden from results: declared hidden plus `exclude`, minus
    /// `make_visible`. Empty when `select` is set.
    pub fn hidden_fields(&self, declared: &[&str]) -> Vec<String> {
        if self.select.is_some() {
            return Vec::new();
        }
        let mut hidden: Vec<String> = Vec::new();
        let candidates = declared
            .iter()
            .map(|f| f.to_string())
            .chain(self.exclude.iter().cloned());
        for field in candidates {
            if !self.make_visible.contains(&field) && !hidden.contains(&field) {
                hidden.push(field);
            }
        }
        hidden
    }
}

/// Soft-delete configuration of a pivot collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotSoftDelete {
    pub field: String,
    pub deleted_at_field: Option<String>,
}

/// Pivot collection layout shared by the many-to-many kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotKeys {
    pub collection: String,
    /// Pivot field referencing the owner
    pub foreign_pivot_key: String,
    /// Pivot field referencing the related document
    pub related_pivot_key: String,
    /// Owner field the pivot references
    pub parent_key: String,
    /// Related field the pivot references
    pub related_key: String,
    /// Discriminator constraint `(type field, type name)` for polymorphic pivots
    pub morph_type: Option<(String, String)>,
    pub soft_delete: Option<PivotSoftDelete>,
    /// `(created_at, updated_at)` field names when the pivot is timestamped
    pub timestamps: Option<(String, String)>,
}

/// Key layout of a relationship, per kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKeys {
    /// hasOne / hasMany: `related[foreign_key] == owner[local_key]`
    Owning {
        foreign_key: String,
        local_key: String,
    },
    /// belongsTo: `owner[foreign_key] == related[owner_key]`
    Inverse {
        foreign_key: String,
        owner_key: String,
    },
    /// belongsToMany / morphToMany / morphedByMany
    Pivot(PivotKeys),
    /// hasManyThrough: `through[first_key] == owner[local_key]` and
    /// `related[second_key] == through[second_local_key]`
    Through {
        first_key: String,
        second_key: String,
        local_key: String,
        second_local_key: String,
    },
    /// morphTo / morphMany: `related[type_field] == owner type` and
    /// `related[id_field] == owner[local_key]`
    Morph {
        type_field: String,
        id_field: String,
        local_key: String,
    },
}

/// Everything needed to compile or query one relationship
#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    pub kind: RelationshipType,
    /// Declared name; the default alias
    pub name: String,
    pub alias: Option<String>,
    pub owner: ModelMeta,
    pub related: ModelMeta,
    /// Intermediate model of hasManyThrough
    pub through: Option<ModelMeta>,
    pub keys: RelationKeys,
    pub options: RelationOptions,
}

impl RelationDescriptor {
    /// Field the relation result is embedded under
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Trashed mode of the related side
    pub fn trashed(&self) -> TrashedMode {
        self.options.trashed.unwrap_or_default()
    }

    /// Owner field whose value drives the lazy default condition
    pub fn owner_key(&self) -> &str {
        match &self.keys {
            RelationKeys::Owning { local_key, .. } => local_key,
            RelationKeys::Inverse { foreign_key, .. } => foreign_key,
            RelationKeys::Pivot(pivot) => &pivot.parent_key,
            RelationKeys::Through { local_key, .. } => local_key,
            RelationKeys::Morph { local_key, .. } => local_key,
        }
    }

    pub fn pivot(&self) -> Option<&PivotKeys> {
        match &self.keys {
            RelationKeys::Pivot(pivot) => Some(pivot),
            _ => None,
        }
    }

    pub(crate) fn pivot_mut(&mut self) -> Option<&mut PivotKeys> {
        match &mut self.keys {
            RelationKeys::Pivot(pivot) => Some(pivot),
            _ => None,
        }
    }

    /// Check that the key layout fits the kind
    pub fn validate(&self) -> ModelResult<()> {
        let fits = match (&self.keys, self.kind) {
            (RelationKeys::Owning { .. }, RelationshipType::HasOne | RelationshipType::HasMany) => true,
            (RelationKeys::Inverse { .. }, RelationshipType::BelongsTo) => true,
            (RelationKeys::Pivot(_), kind) => kind.requires_pivot(),
            (RelationKeys::Through { .. }, RelationshipType::HasManyThrough) => self.through.is_some(),
            (RelationKeys::Morph { .. }, RelationshipType::MorphTo | RelationshipType::MorphMany) => true,
            _ => false,
        };
        if !fits {
            return Err(ModelError::Query(format!(
                "relation '{}' on '{}' has keys that do not fit a {} relationship",
                self.name, self.owner.type_name, self.kind
            )));
        }
        if self.alias().is_empty() || self.alias().contains('.') {
            return Err(ModelError::Query(format!(
                "invalid alias '{}' for relation '{}'",
                self.alias(),
                self.name
            )));
        }
        Ok(())
    }
}
