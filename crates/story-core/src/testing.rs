//! Test doubles for the primary engine

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use story_storage::{CollectionSchema, Engine, EngineConnection, SqliteEngine, StorageError};

use crate::config::StoreConfig;

/// In-memory engine that fails a set number of opens and counts every call
pub(crate) struct FlakyEngine {
    inner: SqliteEngine,
    failures_left: AtomicU32,
    opens: AtomicU32,
}

impl FlakyEngine {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(failures: u32) -> Self {
        Self {
            inner: SqliteEngine::open_in_memory().unwrap(),
            failures_left: AtomicU32::new(failures),
            opens: AtomicU32::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self::failing(u32::MAX)
    }

    pub fn set_available(&self, available: bool) {
        let failures = if available { 0 } else { u32::MAX };
        self.failures_left.store(failures, Ordering::SeqCst);
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Engine for FlakyEngine {
    async fn open(
        &self,
        version: u32,
        collections: &[CollectionSchema],
    ) -> story_storage::Result<Arc<dyn EngineConnection>> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::Task("simulated open failure".to_string()));
        }

        self.inner.open(version, collections).await
    }
}

pub(crate) fn test_config(schema_version: u32) -> StoreConfig {
    let mut config = StoreConfig::new(PathBuf::from("unused"));
    config.schema_version = schema_version;
    config.self_test_delay_ms = None;
    config
}
