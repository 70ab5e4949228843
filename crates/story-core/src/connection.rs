//! Connection Manager
//!
//! Owns the process-wide handle to the primary engine.
//! ```text
//! Closed
//!   ↓ acquire
//! Opening  (concurrent acquires share one pending open)
//!   ↓ opened            ↓ retries exhausted
//! Open                Closed
//!   ↓ reset / forced upgrade / handle closed
//! Closed
//! ```

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;

use story_storage::{Engine, EngineConnection, StorageError};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::schema;
use crate::Result;

type PendingOpen = Shared<BoxFuture<'static, Option<Arc<dyn EngineConnection>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No handle; the next acquire opens one
    Closed,
    /// An open is in flight
    Opening,
    /// A live handle is cached
    Open,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Opening => "opening",
            ConnectionState::Open => "open",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

enum Slot {
    Closed,
    Opening { generation: u64, pending: PendingOpen },
    Open(Arc<dyn EngineConnection>),
}

struct Inner {
    slot: Slot,
    /// Open attempts since creation or the last reset
    attempts: u32,
    /// Version requested on the next open; only ever raised
    target_version: u32,
    /// Bumped whenever the slot is abandoned, so a late open result
    /// cannot overwrite newer state
    generation: u64,
}

pub struct ConnectionManager {
    engine: Arc<dyn Engine>,
    database_name: Arc<str>,
    max_attempts: u32,
    inner: Arc<Mutex<Inner>>,
}

impl ConnectionManager {
    pub fn new(engine: Arc<dyn Engine>, config: &StoreConfig) -> Self {
        Self {
            engine,
            database_name: Arc::from(config.database_name.as_str()),
            max_attempts: config.max_connection_attempts.max(1),
            inner: Arc::new(Mutex::new(Inner {
                slot: Slot::Closed,
                attempts: 0,
                target_version: config.schema_version.max(1),
                generation: 0,
            })),
        }
    }

    /// Get the open handle, opening it if needed.
    ///
    /// Fails only with [`StoreError::ConnectionUnavailable`].
    pub async fn acquire(&self) -> Result<Arc<dyn EngineConnection>> {
        loop {
            match self.acquire_once().await? {
                // Abandoned by a reset or forced upgrade while we waited
                conn if conn.is_closed() => continue,
                conn => return Ok(conn),
            }
        }
    }

    async fn acquire_once(&self) -> Result<Arc<dyn EngineConnection>> {
        let pending = {
            let mut inner = self.inner.lock();
            let in_flight = match &inner.slot {
                Slot::Open(conn) if !conn.is_closed() => return Ok(Arc::clone(conn)),
                Slot::Opening { pending, .. } => Some(pending.clone()),
                _ => None,
            };

            match in_flight {
                Some(pending) => pending,
                None => self.begin_open(&mut inner),
            }
        };

        match pending.await {
            Some(conn) => Ok(conn),
            None => Err(StoreError::ConnectionUnavailable {
                attempts: self.inner.lock().attempts,
            }),
        }
    }

    fn begin_open(&self, inner: &mut Inner) -> PendingOpen {
        inner.generation += 1;
        let generation = inner.generation;

        let engine = Arc::clone(&self.engine);
        let state = Arc::clone(&self.inner);
        let database = Arc::clone(&self.database_name);
        let max_attempts = self.max_attempts;

        let pending = async move {
            let result = open_with_retry(engine.as_ref(), &state, &database, max_attempts).await;
            settle(&state, generation, &result);
            result
        }
        .boxed()
        .shared();

        inner.slot = Slot::Opening {
            generation,
            pending: pending.clone(),
        };
        pending
    }

    /// Drop the cached handle and the attempt counter.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if let Slot::Open(conn) = &inner.slot {
            conn.close();
        }
        inner.slot = Slot::Closed;
        inner.attempts = 0;
        inner.generation += 1;

        tracing::info!(database = %self.database_name, "Connection reset");
    }

    /// Close the current handle and reopen at a higher schema version so the
    /// engine creates any collection the old handle was missing.
    ///
    /// Returns the version of the new handle.
    pub async fn upgrade_schema(&self) -> Result<u32> {
        let target = {
            let mut inner = self.inner.lock();
            let current = match &inner.slot {
                Slot::Open(conn) => {
                    conn.close();
                    conn.version()
                }
                _ => inner.target_version,
            };

            let target = schema::healing_version(current.max(inner.target_version));
            inner.target_version = target;
            inner.slot = Slot::Closed;
            inner.generation += 1;
            target
        };

        tracing::warn!(
            database = %self.database_name,
            target_version = target,
            "Forcing schema upgrade"
        );

        let conn = self.acquire().await?;
        tracing::info!(
            database = %self.database_name,
            version = conn.version(),
            "Schema upgrade complete"
        );
        Ok(conn.version())
    }

    pub fn state(&self) -> ConnectionState {
        match &self.inner.lock().slot {
            Slot::Closed => ConnectionState::Closed,
            Slot::Opening { .. } => ConnectionState::Opening,
            Slot::Open(conn) if conn.is_closed() => ConnectionState::Closed,
            Slot::Open(_) => ConnectionState::Open,
        }
    }

    /// Schema version of the live handle, if any
    pub fn current_version(&self) -> Option<u32> {
        match &self.inner.lock().slot {
            Slot::Open(conn) if !conn.is_closed() => Some(conn.version()),
            _ => None,
        }
    }

    pub fn target_version(&self) -> u32 {
        self.inner.lock().target_version
    }

    pub fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }
}

impl Clone for ConnectionManager {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            database_name: Arc::clone(&self.database_name),
            max_attempts: self.max_attempts,
            inner: Arc::clone(&self.inner),
        }
    }
}

async fn open_with_retry(
    engine: &dyn Engine,
    state: &Mutex<Inner>,
    database: &str,
    max_attempts: u32,
) -> Option<Arc<dyn EngineConnection>> {
    loop {
        let (attempt, version) = {
            let mut inner = state.lock();
            inner.attempts += 1;
            (inner.attempts, inner.target_version)
        };

        tracing::info!(database, attempt, version, "Opening database");

        match engine.open(version, &schema::collections_for(version)).await {
            Ok(conn) => {
                tracing::info!(
                    database,
                    version = conn.version(),
                    collections = ?conn.collection_names(),
                    "Database opened"
                );
                return Some(conn);
            }
            Err(StorageError::VersionMismatch { requested, stored }) if stored > requested => {
                // A heal in an earlier run raised the stored version; follow it
                // without spending an attempt
                let mut inner = state.lock();
                inner.attempts -= 1;
                inner.target_version = inner.target_version.max(stored);
                tracing::warn!(
                    database,
                    requested,
                    stored,
                    "Stored schema is newer than requested, raising target version"
                );
            }
            Err(e) => {
                tracing::error!(database, attempt, error = %e, "Failed to open database");

                if attempt < max_attempts {
                    tracing::info!(database, attempt, max_attempts, "Retrying database open");
                    continue;
                }

                tracing::warn!(database, attempts = attempt, "Database unavailable");
                return None;
            }
        }
    }
}

fn settle(state: &Mutex<Inner>, generation: u64, result: &Option<Arc<dyn EngineConnection>>) {
    let mut inner = state.lock();
    if inner.generation != generation {
        tracing::debug!(generation, "Discarding result of an abandoned open");
        if let Some(conn) = result {
            conn.close();
        }
        return;
    }

    inner.slot = match result {
        Some(conn) => Slot::Open(Arc::clone(conn)),
        None => Slot::Closed,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::BOOKMARKS;
    use crate::testing::{test_config, FlakyEngine};

    #[tokio::test]
    async fn test_acquire_caches_connection() {
        let engine = Arc::new(FlakyEngine::new());
        let manager = ConnectionManager::new(engine.clone(), &test_config(2));
        assert_eq!(manager.state(), ConnectionState::Closed);

        let first = manager.acquire().await.unwrap();
        let second = manager.acquire().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.opens(), 1);
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.current_version(), Some(2));
    }

    #[tokio::test]
    async fn test_concurrent_acquires_share_one_open() {
        let engine = Arc::new(FlakyEngine::new());
        let manager = ConnectionManager::new(engine.clone(), &test_config(2));

        let (a, b, c) = tokio::join!(manager.acquire(), manager.acquire(), manager.acquire());

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(engine.opens(), 1);
        assert_eq!(manager.attempts(), 1);
    }

    #[tokio::test]
    async fn test_retries_until_open_succeeds() {
        let engine = Arc::new(FlakyEngine::failing(2));
        let manager = ConnectionManager::new(engine.clone(), &test_config(2));

        assert!(manager.acquire().await.is_ok());
        assert_eq!(engine.opens(), 3);
        assert_eq!(manager.attempts(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_after_bounded_retries() {
        let engine = Arc::new(FlakyEngine::unavailable());
        let manager = ConnectionManager::new(engine.clone(), &test_config(2));

        let err = manager.acquire().await.err().unwrap();
        assert!(matches!(err, StoreError::ConnectionUnavailable { attempts: 3 }));
        assert_eq!(engine.opens(), 3);
        assert_eq!(manager.state(), ConnectionState::Closed);

        // Past the bound each acquire makes a single further attempt
        assert!(manager.acquire().await.is_err());
        assert_eq!(engine.opens(), 4);
    }

    #[tokio::test]
    async fn test_reset_zeroes_attempts_and_closes_handle() {
        let engine = Arc::new(FlakyEngine::failing(1));
        let manager = ConnectionManager::new(engine.clone(), &test_config(2));

        let conn = manager.acquire().await.unwrap();
        assert_eq!(manager.attempts(), 2);

        manager.reset();
        assert!(conn.is_closed());
        assert_eq!(manager.attempts(), 0);
        assert_eq!(manager.state(), ConnectionState::Closed);

        let reopened = manager.acquire().await.unwrap();
        assert!(!reopened.is_closed());
        assert_eq!(engine.opens(), 3);
    }

    #[tokio::test]
    async fn test_closed_handle_is_reopened() {
        let engine = Arc::new(FlakyEngine::new());
        let manager = ConnectionManager::new(engine.clone(), &test_config(2));

        manager.acquire().await.unwrap().close();
        assert_eq!(manager.state(), ConnectionState::Closed);

        manager.acquire().await.unwrap();
        assert_eq!(engine.opens(), 2);
    }

    #[tokio::test]
    async fn test_upgrade_schema_creates_missing_collection() {
        let engine = Arc::new(FlakyEngine::new());
        let manager = ConnectionManager::new(engine.clone(), &test_config(1));

        let old = manager.acquire().await.unwrap();
        assert!(!old.has_collection(BOOKMARKS));

        let version = manager.upgrade_schema().await.unwrap();
        assert_eq!(version, 2);
        assert!(old.is_closed());
        assert_eq!(manager.target_version(), 2);

        let new = manager.acquire().await.unwrap();
        assert!(new.has_collection(BOOKMARKS));
    }

    #[tokio::test]
    async fn test_version_never_lowered_after_reset() {
        let engine = Arc::new(FlakyEngine::new());
        let manager = ConnectionManager::new(engine.clone(), &test_config(1));

        manager.upgrade_schema().await.unwrap();
        manager.reset();

        let conn = manager.acquire().await.unwrap();
        assert_eq!(conn.version(), 2);
    }

    #[tokio::test]
    async fn test_follows_newer_stored_version() {
        let engine = Arc::new(FlakyEngine::new());

        let healed = ConnectionManager::new(engine.clone(), &test_config(1));
        assert_eq!(healed.upgrade_schema().await.unwrap(), 2);

        // A fresh manager still configured for version 1
        let manager = ConnectionManager::new(engine.clone(), &test_config(1));
        let conn = manager.acquire().await.unwrap();

        assert_eq!(conn.version(), 2);
        assert!(conn.has_collection(BOOKMARKS));
        assert_eq!(manager.target_version(), 2);
        assert_eq!(manager.attempts(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_open_is_closed() {
        let engine = Arc::new(FlakyEngine::new());
        let manager = ConnectionManager::new(engine.clone(), &test_config(1));

        let (waiting, upgraded) = tokio::join!(manager.acquire(), manager.upgrade_schema());

        assert_eq!(upgraded.unwrap(), 2);
        let waiting = waiting.unwrap();
        assert!(!waiting.is_closed());
        assert_eq!(waiting.version(), 2);
        assert!(engine.opens() >= 2);
        assert_eq!(manager.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_reset_during_open_closes_late_handle() {
        let engine = Arc::new(FlakyEngine::new());
        let manager = ConnectionManager::new(engine.clone(), &test_config(2));

        let pending = {
            let mut inner = manager.inner.lock();
            manager.begin_open(&mut inner)
        };
        manager.reset();

        let late = pending.await.unwrap();
        assert!(late.is_closed());
        assert_eq!(manager.state(), ConnectionState::Closed);

        let fresh = manager.acquire().await.unwrap();
        assert!(!fresh.is_closed());
    }
}
