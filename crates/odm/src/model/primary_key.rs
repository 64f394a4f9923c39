//! Document identifiers
//!
//! A [`DocumentId`] is the store-native identifier. It is stored in documents
//! in its canonical string form, and every boundary that accepts an identifier
//! (find, attach, detach, sync) also accepts any string form of it. Strings are
//! normalized before comparison or storage, so `"6F9619FF8B86D011B42D00C04FC964FF"`
//! and `"6f9619ff-8b86-d011-b42d-00c04fc964ff"` name the same document.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};

/// Store-native document identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        DocumentId(Uuid::new_v4())
    }

    /// Parse any accepted string form
    pub fn parse(input: &str) -> ModelResult<Self> {
        Uuid::parse_str(input.trim())
            .map(DocumentId)
            .map_err(|e| ModelError::InvalidArgument(format!("invalid document id '{}': {}", input, e)))
    }

    /// Canonical string form, the representation written to documents
    pub fn to_canonical(&self) -> String {
        self.0.hyphenated().to_string()
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// JSON value stored in documents for this id
    pub fn to_value(&self) -> Value {
        Value::String(self.to_canonical())
    }

    /// Check if this is the nil identifier
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for DocumentId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentId::parse(s)
    }
}

impl From<Uuid> for DocumentId {
    fn from(id: Uuid) -> Self {
        DocumentId(id)
    }
}

impl From<DocumentId> for Value {
    fn from(id: DocumentId) -> Self {
        id.to_value()
    }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_canonical())
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DocumentId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Conversion of the accepted identifier shapes into a [`DocumentId`]
pub trait IntoDocumentId {
    fn into_document_id(self) -> ModelResult<DocumentId>;
}

impl IntoDocumentId for DocumentId {
    fn into_document_id(self) -> ModelResult<DocumentId> {
        Ok(self)
    }
}

impl IntoDocumentId for &DocumentId {
    fn into_document_id(self) -> ModelResult<DocumentId> {
        Ok(*self)
    }
}

impl IntoDocumentId for Uuid {
    fn into_document_id(self) -> ModelResult<DocumentId> {
        Ok(DocumentId(self))
    }
}

impl IntoDocumentId for &str {
    fn into_document_id(self) -> ModelResult<DocumentId> {
        DocumentId::parse(self)
    }
}

impl IntoDocumentId for String {
    fn into_document_id(self) -> ModelResult<DocumentId> {
        DocumentId::parse(&self)
    }
}

impl IntoDocumentId for &String {
    fn into_document_id(self) -> ModelResult<DocumentId> {
        DocumentId::parse(self)
    }
}

impl IntoDocumentId for &Value {
    fn into_document_id(self) -> ModelResult<DocumentId> {
        match self {
            Value::String(s) => DocumentId::parse(s),
            Value::Object(map) => match map.get("$oid").or_else(|| map.get("$uuid")) {
                Some(Value::String(s)) => DocumentId::parse(s),
                _ => Err(ModelError::InvalidArgument(format!(
                    "unsupported id object: {}",
                    self
                ))),
            },
            other => Err(ModelError::InvalidArgument(format!(
                "expected a document id, got {}",
                other
            ))),
        }
    }
}

impl IntoDocumentId for Value {
    fn into_document_id(self) -> ModelResult<DocumentId> {
        (&self).into_document_id()
    }
}

/// Normalize a list of identifiers, failing on the first malformed entry
pub fn normalize_ids<I, T>(ids: I) -> ModelResult<Vec<DocumentId>>
where
    I: IntoIterator<Item = T>,
    T: IntoDocumentId,
{
    ids.into_iter().map(IntoDocumentId::into_document_id).collect()
}

/// Canonicalize a stored value when it is an identifier; other values pass through.
pub fn canonicalize_value(value: &Value) -> Value {
    match value.into_document_id() {
        Ok(id) => id.to_value(),
        Err(_) => value.clone(),
    }
}
