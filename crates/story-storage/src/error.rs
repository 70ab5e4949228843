//! Engine error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Requested version {requested} is lower than stored version {stored}")]
    VersionMismatch { requested: u32, stored: u32 },

    #[error("Invalid schema version: {0}")]
    InvalidVersion(u32),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Record in {collection} has no usable '{key_path}' key")]
    MissingKey { collection: String, key_path: String },

    #[error("Connection is closed")]
    Closed,

    #[error("Storage task failed: {0}")]
    Task(String),
}
