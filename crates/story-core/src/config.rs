//! Store configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::schema::LATEST_SCHEMA_VERSION;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Logical database name, used in logs
    pub database_name: String,
    /// Path to the primary database file
    pub database_path: PathBuf,
    /// Path to the fallback key-value file
    pub fallback_path: PathBuf,
    /// Namespace for user-data mirror keys in the fallback store
    pub fallback_prefix: String,
    /// Schema version requested on first open
    pub schema_version: u32,
    /// Open attempts before the primary engine is reported unavailable
    pub max_connection_attempts: u32,
    /// Run a self-test this long after a connection reset
    pub self_test_delay_ms: Option<u64>,
}

impl StoreConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        let database_name = "story-app-db".to_string();

        Self {
            database_path: data_dir.join(format!("{database_name}.sqlite3")),
            fallback_path: data_dir.join("fallback.json"),
            database_name,
            fallback_prefix: "idb_fallback_".to_string(),
            schema_version: LATEST_SCHEMA_VERSION,
            max_connection_attempts: 3,
            self_test_delay_ms: Some(500),
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("story-store"))
            .unwrap_or_else(|| PathBuf::from(".story-store"))
    }

    /// Load from a JSON file; absent fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_name.trim().is_empty() {
            return Err(StoreError::Config("database_name cannot be empty".to_string()));
        }
        if self.fallback_prefix.is_empty() {
            return Err(StoreError::Config("fallback_prefix cannot be empty".to_string()));
        }
        if self.schema_version == 0 {
            return Err(StoreError::Config("schema_version must be at least 1".to_string()));
        }
        if self.max_connection_attempts == 0 {
            return Err(StoreError::Config(
                "max_connection_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding the store's files
    pub fn storage_dir(&self) -> Option<&Path> {
        self.database_path.parent()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

// Simple dirs implementation for the per-user data directory
mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
        }
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }
}
