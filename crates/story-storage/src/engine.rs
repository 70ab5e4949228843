//! Engine traits
//!
//! An [`Engine`] hands out [`EngineConnection`]s pinned to one schema version.
//! The set of collections is snapshotted when the connection opens; a
//! collection created by a later upgrade is invisible until the caller reopens.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Declaration of a keyed collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Collection name, unique within the database
    pub name: String,
    /// Top-level field of each record holding its unique key
    pub key_path: String,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
        }
    }
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Open the database at `version`.
    ///
    /// If the stored version is older, every collection in `collections` that
    /// does not exist yet is created and the stored version is raised, all in
    /// one transaction. A `version` below the stored one is an error.
    async fn open(
        &self,
        version: u32,
        collections: &[CollectionSchema],
    ) -> Result<Arc<dyn EngineConnection>>;
}

#[async_trait]
pub trait EngineConnection: Send + Sync {
    /// Schema version this connection was opened at
    fn version(&self) -> u32;

    fn collection_names(&self) -> Vec<String>;

    fn has_collection(&self, name: &str) -> bool;

    /// All records of a collection, in key order
    async fn get_all(&self, collection: &str) -> Result<Vec<Value>>;

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    /// Upsert every record in one write transaction.
    ///
    /// Keys are read from each record's key path. Either all records commit
    /// or none do.
    async fn put_all(&self, collection: &str, records: Vec<Value>) -> Result<()>;

    async fn delete(&self, collection: &str, key: &str) -> Result<()>;

    async fn clear(&self, collection: &str) -> Result<()>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}
