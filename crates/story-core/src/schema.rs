//! Collection catalogue
//!
//! ```text
//! v1: user-data (key), stories (id)
//! v2: bookmarks (id)
//! ```

use story_storage::CollectionSchema;

pub const USER_DATA: &str = "user-data";
pub const STORIES: &str = "stories";
pub const BOOKMARKS: &str = "bookmarks";

pub const LATEST_SCHEMA_VERSION: u32 = 2;

/// (name, key path, version that introduced it)
const CATALOGUE: &[(&str, &str, u32)] = &[
    (USER_DATA, "key", 1),
    (STORIES, "id", 1),
    (BOOKMARKS, "id", 2),
];

/// Collections that must exist at `version`
pub fn collections_for(version: u32) -> Vec<CollectionSchema> {
    CATALOGUE
        .iter()
        .filter(|(_, _, since)| *since <= version)
        .map(|(name, key_path, _)| CollectionSchema::new(*name, *key_path))
        .collect()
}

/// Version to request when an open handle is missing a collection.
pub fn healing_version(current: u32) -> u32 {
    current.saturating_add(1).max(LATEST_SCHEMA_VERSION)
}
