//! Error types for Folio operations

use thiserror::Error;

/// Backing relational store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Invalid parameter at position {index}: {reason}")]
    InvalidParameter { index: usize, reason: String },

    #[error("Failed to decode row: {reason}")]
    Decode { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Distributed key-value cache errors.
///
/// These never reach a caller of the cache or permission layers: they are
/// logged and the operation degrades to the next tier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache value for {key} could not be (de)serialized: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Background write queue is full")]
    QueueFull,
}

/// Permission and role parsing errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("Permission '{value}' is not of the form resource:action")]
    InvalidFormat { value: String },

    #[error("Unknown resource '{value}'")]
    UnknownResource { value: String },

    #[error("Unknown action '{value}'")]
    UnknownAction { value: String },

    #[error("Unknown role '{value}'")]
    UnknownRole { value: String },

    #[error("Invalid user id '{value}'")]
    InvalidUserId { value: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Folio errors.
#[derive(Debug, Clone, Error)]
pub enum FolioError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Folio operations.
pub type FolioResult<T> = Result<T, FolioError>;
