//! ODM configuration
//!
//! Field-name defaults for soft deletes and timestamps, the database name and
//! logging settings. Values come from the environment with sane defaults; an
//! installed configuration is consulted by every [`Model`](crate::model::Model)
//! that does not override the corresponding method.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

use crate::error::ConfigError;

static GLOBAL_CONFIG: OnceCell<OdmConfig> = OnceCell::new();

/// Configuration source information for debugging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value loaded from environment variable
    EnvVar(String),
    /// Default value used
    Default(String),
    /// Value provided programmatically
    Programmatic,
}

impl ConfigSource {
    pub fn is_env_var(&self) -> bool {
        matches!(self, ConfigSource::EnvVar(_))
    }

    pub fn is_default(&self) -> bool {
        matches!(self, ConfigSource::Default(_))
    }
}

/// Output format of the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidValue {
                field: "log_format".to_string(),
                value: s.to_string(),
                expected: "pretty or json".to_string(),
            }),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let level = get_env_or_default("ODM_LOG_LEVEL", "info");
        let format = LogFormat::from_str(&get_env_or_default("ODM_LOG_FORMAT", "pretty"))?;
        Ok(Self { level, format })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        EnvFilter::try_new(&self.level).map_err(|e| ConfigError::ValidationFailed {
            field: "log_level".to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

/// ODM configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OdmConfig {
    pub database: String,
    pub primary_key: String,
    pub soft_delete_field: String,
    pub deleted_at_field: String,
    pub created_at_field: String,
    pub updated_at_field: String,
    pub logging: LoggingConfig,
}

impl Default for OdmConfig {
    fn default() -> Self {
        Self {
            database: "elif".to_string(),
            primary_key: "_id".to_string(),
            soft_delete_field: "isDeleted".to_string(),
            deleted_at_field: "deletedAt".to_string(),
            created_at_field: "createdAt".to_string(),
            updated_at_field: "updatedAt".to_string(),
            logging: LoggingConfig::default(),
        }
    }
}

impl OdmConfig {
    /// Load configuration from `ODM_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            database: get_env_or_default("ODM_DATABASE", &defaults.database),
            primary_key: get_env_or_default("ODM_PRIMARY_KEY", &defaults.primary_key),
            soft_delete_field: get_env_or_default(
                "ODM_SOFT_DELETE_FIELD",
                &defaults.soft_delete_field,
            ),
            deleted_at_field: get_env_or_default("ODM_DELETED_AT_FIELD", &defaults.deleted_at_field),
            created_at_field: get_env_or_default("ODM_CREATED_AT_FIELD", &defaults.created_at_field),
            updated_at_field: get_env_or_default("ODM_UPDATED_AT_FIELD", &defaults.updated_at_field),
            logging: LoggingConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("database", &self.database),
            ("primary_key", &self.primary_key),
            ("soft_delete_field", &self.soft_delete_field),
            ("deleted_at_field", &self.deleted_at_field),
            ("created_at_field", &self.created_at_field),
            ("updated_at_field", &self.updated_at_field),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationFailed {
                    field: field.to_string(),
                    reason: "value cannot be empty".to_string(),
                });
            }
            if field != "database" && value.contains('.') {
                return Err(ConfigError::ValidationFailed {
                    field: field.to_string(),
                    reason: "field names cannot contain '.'".to_string(),
                });
            }
        }
        self.logging.validate()
    }

    /// Where each value came from
    pub fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let vars = [
            ("database", "ODM_DATABASE"),
            ("primary_key", "ODM_PRIMARY_KEY"),
            ("soft_delete_field", "ODM_SOFT_DELETE_FIELD"),
            ("deleted_at_field", "ODM_DELETED_AT_FIELD"),
            ("created_at_field", "ODM_CREATED_AT_FIELD"),
            ("updated_at_field", "ODM_UPDATED_AT_FIELD"),
            ("log_level", "ODM_LOG_LEVEL"),
            ("log_format", "ODM_LOG_FORMAT"),
        ];
        vars.iter()
            .map(|(field, var)| {
                let source = match env::var(var) {
                    Ok(_) => ConfigSource::EnvVar(var.to_string()),
                    Err(_) => ConfigSource::Default(field.to_string()),
                };
                (field.to_string(), source)
            })
            .collect()
    }

    /// Install this configuration process-wide. Fails if one is already installed.
    pub fn install(self) -> Result<(), ConfigError> {
        self.validate()?;
        GLOBAL_CONFIG
            .set(self)
            .map_err(|_| ConfigError::AlreadyInstalled)
    }

    /// The installed configuration, or the defaults when none was installed
    pub fn global() -> &'static OdmConfig {
        GLOBAL_CONFIG.get_or_init(OdmConfig::default)
    }
}

/// Install a `tracing-subscriber` formatter for the given logging settings.
///
/// `RUST_LOG` takes precedence over the configured level when present.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ConfigError::ValidationFailed {
            field: "log_level".to_string(),
            reason: e.to_string(),
        })?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };

    result.map_err(|e| ConfigError::ValidationFailed {
        field: "logging".to_string(),
        reason: e.to_string(),
    })
}

fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
