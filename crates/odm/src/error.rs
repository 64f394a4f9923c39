//! Error types for the ODM
//!
//! Every failure carries a kind tag (see [`ErrorKind`]) and, where a lower
//! layer failed, the wrapped cause for diagnostics.

use std::error::Error as StdError;

use thiserror::Error;

/// Boxed lower-level cause attached to a [`ModelError`]
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// Coarse classification of a [`ModelError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    RelationNotFound,
    InvalidArgument,
    Configuration,
    Query,
    Database,
    Serialization,
}

/// Error types for ODM operations
#[derive(Debug, Error)]
pub enum ModelError {
    /// A single-result lookup found nothing (raised only by `*_or_fail`)
    #[error("Record not found in collection '{0}'")]
    NotFound(String),

    /// A named relation is not registered on the model
    #[error("Relationship '{relation}' is not defined on model '{model}'")]
    RelationNotFound { model: String, relation: String },

    /// Malformed input, e.g. an identifier that cannot be normalized
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The entity has no identifier where one is required
    #[error("Primary key is missing or invalid")]
    MissingPrimaryKey,

    /// Configuration could not be loaded or the store is unreachable
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Predicate or pipeline assembly failed
    #[error("Query error: {0}")]
    Query(String),

    /// The document store rejected an operation
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelError {
    /// Kind tag of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelError::NotFound(_) => ErrorKind::NotFound,
            ModelError::RelationNotFound { .. } => ErrorKind::RelationNotFound,
            ModelError::InvalidArgument(_) | ModelError::MissingPrimaryKey => {
                ErrorKind::InvalidArgument
            }
            ModelError::Configuration { .. } => ErrorKind::Configuration,
            ModelError::Query(_) => ErrorKind::Query,
            ModelError::Database { .. } => ErrorKind::Database,
            ModelError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Create a database error without an underlying cause
    pub fn database(message: impl Into<String>) -> Self {
        ModelError::Database {
            message: message.into(),
            source: None,
        }
    }

    /// Create a database error wrapping a lower-level cause
    pub fn database_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ModelError::Database {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error without an underlying cause
    pub fn configuration(message: impl Into<String>) -> Self {
        ModelError::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Check whether this is a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, ModelError::NotFound(_))
    }
}

/// Error types for configuration loading
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed { field: String, reason: String },

    #[error("Configuration already installed")]
    AlreadyInstalled,
}

impl From<ConfigError> for ModelError {
    fn from(err: ConfigError) -> Self {
        ModelError::Configuration {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(ModelError::NotFound("posts".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            ModelError::RelationNotFound {
                model: "Post".into(),
                relation: "tags".into()
            }
            .kind(),
            ErrorKind::RelationNotFound
        );
        assert_eq!(ModelError::MissingPrimaryKey.kind(), ErrorKind::InvalidArgument);
        assert_eq!(ModelError::database("down").kind(), ErrorKind::Database);
    }

    #[test]
    fn test_config_error_wraps_cause() {
        let err: ModelError = ConfigError::MissingEnvVar {
            var: "ODM_DATABASE".into(),
        }
        .into();

        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("ODM_DATABASE"));
    }

    #[test]
    fn test_display_messages() {
        let err = ModelError::RelationNotFound {
            model: "User".into(),
            relation: "roles".into(),
        };
        assert_eq!(
            err.to_string(),
            "Relationship 'roles' is not defined on model 'User'"
        );
    }
}
