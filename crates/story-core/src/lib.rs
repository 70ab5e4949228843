//! Story Store Core
//!
//! Local persistence for the story app: cached stories, bookmarks and user
//! settings. Every public operation on [`StoryStore`] degrades to an empty or
//! failed result instead of returning an error; collaborators decide what to
//! show the user.

mod collection;
mod config;
mod connection;
mod error;
mod fallback;
mod record;
mod schema;
mod store;

#[cfg(test)]
mod testing;

pub use collection::Collection;
pub use config::StoreConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use error::StoreError;
pub use fallback::UserData;
pub use record::{Record, Story, UserDataEntry};
pub use schema::{BOOKMARKS, LATEST_SCHEMA_VERSION, STORIES, USER_DATA};
pub use store::StoryStore;

// Re-export backends
pub use story_kv::{FileStore, KvError, MemoryStore, SimpleStore};
pub use story_storage::{CollectionSchema, Engine, EngineConnection, SqliteEngine, StorageError};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
