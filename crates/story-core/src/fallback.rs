//! User data with a simple-store mirror
//!
//! Writes go to both the simple store (namespaced by prefix) and the
//! `user-data` collection. Reads try the simple store first and fall through
//! to the database only when the mirror has nothing. The mirror wins even if
//! the database holds a newer value; availability matters more here than
//! freshness.

use serde_json::Value;
use std::sync::Arc;

use story_kv::{SimpleStore, SimpleStoreExt};

use crate::collection::Collection;
use crate::error::StoreError;
use crate::record::UserDataEntry;

pub struct UserData {
    collection: Collection<UserDataEntry>,
    fallback: Arc<dyn SimpleStore>,
    prefix: Arc<str>,
}

impl UserData {
    pub fn new(
        collection: Collection<UserDataEntry>,
        fallback: Arc<dyn SimpleStore>,
        prefix: &str,
    ) -> Self {
        Self {
            collection,
            fallback,
            prefix: Arc::from(prefix),
        }
    }

    pub fn fallback_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn collection(&self) -> &Collection<UserDataEntry> {
        &self.collection
    }

    /// Save `data` under `key`.
    ///
    /// Succeeds if either the mirror or the database took the write.
    pub async fn save(&self, key: &str, data: Value) -> bool {
        if key.trim().is_empty() {
            tracing::error!("Key is required to save user data");
            return false;
        }

        let fallback_key = self.fallback_key(key);
        let mirrored = match self.fallback.set_json(&fallback_key, &data) {
            Ok(()) => {
                tracing::debug!(key = %fallback_key, "Mirrored user data to fallback store");
                true
            }
            Err(e) => {
                tracing::error!(key = %fallback_key, error = %e, "Failed to mirror user data");
                false
            }
        };

        let entry = UserDataEntry::new(key, data);
        let stored = match self.collection.try_put(&entry).await {
            Ok(()) => {
                tracing::info!(key, "Saved user data");
                true
            }
            Err(StoreError::ConnectionUnavailable { .. }) => {
                tracing::warn!(key, "Database not available, user data kept in fallback store");
                false
            }
            Err(e) => {
                tracing::error!(key, error = %e, "Failed to save user data to database");
                false
            }
        };

        mirrored || stored
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        if key.trim().is_empty() {
            tracing::error!("Key is required to read user data");
            return None;
        }

        let fallback_key = self.fallback_key(key);
        match self.fallback.get_json::<Value>(&fallback_key) {
            Ok(Some(value)) => {
                tracing::debug!(key = %fallback_key, "Read user data from fallback store");
                return Some(value);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(key = %fallback_key, error = %e, "Failed to read fallback store");
            }
        }

        match self.collection.try_get_by_id(key).await {
            Ok(Some(entry)) => {
                tracing::debug!(key, "Read user data from database");
                Some(entry.data)
            }
            Ok(None) => {
                tracing::debug!(key, "No user data found");
                None
            }
            Err(StoreError::ConnectionUnavailable { .. }) => {
                tracing::warn!(key, "Database not available, no fallback entry either");
                None
            }
            Err(e) => {
                tracing::error!(key, error = %e, "Failed to read user data");
                None
            }
        }
    }

    /// Drop every mirrored entry, leaving unrelated simple-store keys alone.
    pub fn clear_fallback(&self) -> bool {
        match self.fallback.remove_prefix(&self.prefix) {
            Ok(removed) => {
                tracing::info!(removed, "Cleared fallback user data");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to clear fallback user data");
                false
            }
        }
    }
}

impl Clone for UserData {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            fallback: Arc::clone(&self.fallback),
            prefix: Arc::clone(&self.prefix),
        }
    }
}
