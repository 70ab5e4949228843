//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] story_storage::StorageError),

    #[error("Fallback store error: {0}")]
    Fallback(#[from] story_kv::KvError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database unavailable after {attempts} connection attempts")]
    ConnectionUnavailable { attempts: u32 },

    #[error("Collection missing from open database: {0}")]
    SchemaDrift(String),

    #[error("Invalid record: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Engine errors about a missing collection mean the open handle predates
    /// the schema it is being used with.
    pub(crate) fn from_engine(err: story_storage::StorageError) -> Self {
        match err {
            story_storage::StorageError::CollectionNotFound(name) => StoreError::SchemaDrift(name),
            other => StoreError::Storage(other),
        }
    }
}
