use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-field validation failure recorded on an entity.
///
/// These are never returned as `Err`; they are stored on the entity and
/// block persistence until a corrective assignment clears them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationError {
    Required,
    Null,
    Type,
    Min,
    Max,
    TooShort,
    TooLong,
    Regex,
    Value,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::Required => "required",
            ValidationError::Null => "null",
            ValidationError::Type => "type",
            ValidationError::Min => "min",
            ValidationError::Max => "max",
            ValidationError::TooShort => "too_short",
            ValidationError::TooLong => "too_long",
            ValidationError::Regex => "regex",
            ValidationError::Value => "value",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Failures raised by a storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Not connected")]
    NotConnected,
}

/// Failures raised by a cache backend.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Structural errors: a caller broke the contract of an operation.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Field not defined: '{0}'")]
    UnknownField(String),

    #[error("Field already defined: '{0}'")]
    DuplicateField(String),

    #[error("Invalid definition for field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Field '{field}' of {entity} is immutable")]
    ImmutableField { entity: String, field: String },

    #[error("{entity} has errors: {}", format_errors(.errors))]
    PendingErrors {
        entity: String,
        errors: BTreeMap<String, ValidationError>,
    },

    #[error("Can't insert, {entity} already has id {id}")]
    AlreadyPersisted { entity: String, id: String },

    #[error("{entity} has no id")]
    MissingId { entity: String },

    #[error("Expected a {expected} entity, got {found}")]
    WrongEntityType { expected: String, found: String },

    #[error("Batch of {requested} ids exceeds the maximum of {max}")]
    BatchTooLarge { requested: usize, max: usize },

    #[error("Invalid batch size: {0}")]
    InvalidBatchSize(usize),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Invalid operand for '{field}': {code}")]
    InvalidOperand {
        field: String,
        code: ValidationError,
    },

    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelError {
    pub(crate) fn missing_id(entity: &str) -> Self {
        ModelError::MissingId {
            entity: entity.to_string(),
        }
    }

    pub(crate) fn already_persisted(entity: &str, id: impl fmt::Display) -> Self {
        ModelError::AlreadyPersisted {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

fn format_errors(errors: &BTreeMap<String, ValidationError>) -> String {
    errors
        .iter()
        .map(|(field, code)| format!("{field}={code}"))
        .collect::<Vec<_>>()
        .join(", ")
}
