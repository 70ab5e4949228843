//! Story store facade
//!
//! The single entry point pages and presenters use. Nothing here returns an
//! error after construction: failures are logged and come back as `false`,
//! an empty list or `None`.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use story_kv::{FileStore, MemoryStore, SimpleStore};
use story_storage::{Engine, SqliteEngine};

use crate::collection::Collection;
use crate::config::StoreConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::StoreError;
use crate::fallback::UserData;
use crate::record::Story;
use crate::schema::{BOOKMARKS, STORIES, USER_DATA};
use crate::Result;

/// Forced upgrades a single bookmark write may trigger
const MAX_SCHEMA_HEALS: u32 = 1;

const SELF_TEST_KEY: &str = "idb_test";

pub struct StoryStore {
    config: Arc<StoreConfig>,
    connections: ConnectionManager,
    stories: Collection<Story>,
    bookmarks: Collection<Story>,
    user_data: UserData,
}

impl StoryStore {
    /// Open the SQLite database and fallback file named in `config`.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        // Ensure data directory exists
        if let Some(dir) = config.storage_dir() {
            std::fs::create_dir_all(dir)?;
        }

        let engine = SqliteEngine::open(&config.database_path)?;
        let fallback = FileStore::open(&config.fallback_path)?;

        Ok(Self::with_backends(config, Arc::new(engine), Arc::new(fallback)))
    }

    /// A store that keeps nothing on disk
    pub fn in_memory() -> Result<Self> {
        let engine = SqliteEngine::open_in_memory()?;
        Ok(Self::with_backends(
            StoreConfig::default(),
            Arc::new(engine),
            Arc::new(MemoryStore::new()),
        ))
    }

    pub fn with_backends(
        config: StoreConfig,
        engine: Arc<dyn Engine>,
        fallback: Arc<dyn SimpleStore>,
    ) -> Self {
        let connections = ConnectionManager::new(engine, &config);
        let user_data = UserData::new(
            Collection::new(USER_DATA, connections.clone()),
            fallback,
            &config.fallback_prefix,
        );

        tracing::info!(
            database = %config.database_name,
            schema_version = config.schema_version,
            "Story store initialized"
        );

        Self {
            stories: Collection::new(STORIES, connections.clone()),
            bookmarks: Collection::new(BOOKMARKS, connections.clone()),
            config: Arc::new(config),
            connections,
            user_data,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    // === Stories ===

    pub async fn get_all_stories(&self) -> Vec<Story> {
        self.stories.get_all().await
    }

    pub async fn get_story_by_id(&self, id: &str) -> Option<Story> {
        self.stories.get_by_id(id).await
    }

    /// Cache a batch of stories; all of them are written or none are.
    pub async fn save_stories(&self, stories: &[Story]) -> bool {
        self.stories.put_many(stories).await
    }

    pub async fn delete_story(&self, id: &str) -> bool {
        self.stories.remove(id).await
    }

    // === Bookmarks ===

    pub async fn get_all_bookmarks(&self) -> Vec<Story> {
        self.bookmarks.get_all().await
    }

    pub async fn get_bookmark_by_id(&self, id: &str) -> Option<Story> {
        self.bookmarks.get_by_id(id).await
    }

    /// Bookmark a story.
    ///
    /// A handle opened before the bookmarks collection existed is closed,
    /// the schema is upgraded, and the write is retried once.
    pub async fn save_bookmark(&self, story: &Story) -> bool {
        let mut heals = 0;

        loop {
            match self.bookmarks.try_put(story).await {
                Ok(()) => {
                    tracing::info!(id = %story.id, "Saved bookmark");
                    return true;
                }
                Err(StoreError::SchemaDrift(collection)) if heals < MAX_SCHEMA_HEALS => {
                    heals += 1;
                    tracing::warn!(%collection, "Collection missing, upgrading database");

                    if let Err(e) = self.connections.upgrade_schema().await {
                        tracing::error!(id = %story.id, error = %e, "Schema upgrade failed");
                        return false;
                    }
                }
                Err(e) => {
                    tracing::error!(id = %story.id, error = %e, "Failed to save bookmark");
                    return false;
                }
            }
        }
    }

    pub async fn remove_bookmark(&self, id: &str) -> bool {
        self.bookmarks.remove(id).await
    }

    pub async fn is_bookmarked(&self, id: &str) -> bool {
        self.bookmarks.get_by_id(id).await.is_some()
    }

    /// Full scan; not cheaper than [`Self::get_all_bookmarks`].
    pub async fn get_bookmark_count(&self) -> usize {
        self.bookmarks.get_all().await.len()
    }

    // === User data ===

    pub async fn save_user_data<T: Serialize + ?Sized>(&self, key: &str, data: &T) -> bool {
        match serde_json::to_value(data) {
            Ok(value) => self.user_data.save(key, value).await,
            Err(e) => {
                tracing::error!(key, error = %e, "User data is not serializable");
                false
            }
        }
    }

    pub async fn get_user_data<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.user_data.get(key).await?;
        match serde_json::from_value(value) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(key, error = %e, "Stored user data has unexpected shape");
                None
            }
        }
    }

    // === Maintenance ===

    /// Clear cached stories and user data, including the fallback mirror.
    /// Bookmarks are kept.
    ///
    /// The mirror is only cleared once the database collections are, so a
    /// failed call leaves user data readable.
    pub async fn clear_all_data(&self) -> bool {
        let cleared = async {
            self.stories.try_clear().await?;
            self.user_data.collection().try_clear().await?;
            Ok::<_, StoreError>(())
        }
        .await;

        if let Err(e) = cleared {
            tracing::error!(error = %e, "Failed to clear data");
            return false;
        }

        tracing::info!("Cleared stories and user data");
        self.user_data.clear_fallback()
    }

    /// Drop the connection so the next call reopens it, then schedule a
    /// self-test if configured.
    pub fn reset_connection(&self) {
        self.connections.reset();

        let Some(delay_ms) = self.config.self_test_delay_ms else {
            return;
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No async runtime, skipping scheduled self-test");
            return;
        };

        let store = self.clone();
        handle.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            store.self_test().await;
        });
    }

    /// Round-trip a known value through user data.
    pub async fn self_test(&self) -> bool {
        tracing::info!("Testing storage round trip");

        let payload = json!({
            "test": "data",
            "timestamp": Utc::now().timestamp_millis(),
        });

        if !self.user_data.save(SELF_TEST_KEY, payload).await {
            tracing::error!("Self-test failed: could not save test data");
            return false;
        }

        match self.user_data.get(SELF_TEST_KEY).await {
            Some(value) if value.get("test").and_then(Value::as_str) == Some("data") => {
                tracing::info!(retrieved = %value, "Self-test passed");
                true
            }
            other => {
                tracing::error!(retrieved = ?other, "Self-test failed: data mismatch");
                false
            }
        }
    }

    /// Schema version of the open connection, if one is open
    pub fn schema_version(&self) -> Option<u32> {
        self.connections.current_version()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connections.state()
    }
}

impl Clone for StoryStore {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            connections: self.connections.clone(),
            stories: self.stories.clone(),
            bookmarks: self.bookmarks.clone(),
            user_data: self.user_data.clone(),
        }
    }
}
