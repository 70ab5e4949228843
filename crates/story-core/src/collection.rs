//! Typed accessors over one collection
//!
//! The `try_*` methods report every failure. The plain methods are the
//! boundary used by the rest of the app: they log and degrade to an empty
//! list, `None` or `false`.

use std::marker::PhantomData;
use std::sync::Arc;

use story_storage::EngineConnection;

use crate::connection::ConnectionManager;
use crate::error::StoreError;
use crate::record::Record;
use crate::Result;

pub struct Collection<R> {
    name: &'static str,
    connections: ConnectionManager,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> Collection<R> {
    pub fn new(name: &'static str, connections: ConnectionManager) -> Self {
        Self {
            name,
            connections,
            _record: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquire a handle that knows this collection.
    async fn connection(&self) -> Result<Arc<dyn EngineConnection>> {
        let conn = self.connections.acquire().await?;
        if !conn.has_collection(self.name) {
            return Err(StoreError::SchemaDrift(self.name.to_string()));
        }
        Ok(conn)
    }

    pub async fn try_get_all(&self) -> Result<Vec<R>> {
        let conn = self.connection().await?;
        let values = conn
            .get_all(self.name)
            .await
            .map_err(StoreError::from_engine)?;

        let records = values
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(collection = self.name, error = %e, "Skipping unreadable record");
                    None
                }
            })
            .collect();

        Ok(records)
    }

    pub async fn try_get_by_id(&self, id: &str) -> Result<Option<R>> {
        let conn = self.connection().await?;
        let value = conn
            .get(self.name, id)
            .await
            .map_err(StoreError::from_engine)?;

        let Some(value) = value else {
            return Ok(None);
        };

        match serde_json::from_value(value) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(collection = self.name, id, error = %e, "Stored record is unreadable");
                Ok(None)
            }
        }
    }

    pub async fn try_put(&self, record: &R) -> Result<()> {
        self.try_put_many(std::slice::from_ref(record)).await
    }

    /// Write every record in one transaction. An invalid record rejects the
    /// whole batch before the engine is touched.
    pub async fn try_put_many(&self, records: &[R]) -> Result<()> {
        for record in records {
            record.validate()?;
        }

        let values = records
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let conn = self.connection().await?;
        conn.put_all(self.name, values)
            .await
            .map_err(StoreError::from_engine)
    }

    pub async fn try_remove(&self, id: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(StoreError::Validation(format!(
                "cannot remove from {} without '{}'",
                self.name,
                R::KEY_PATH
            )));
        }

        let conn = self.connection().await?;
        conn.delete(self.name, id)
            .await
            .map_err(StoreError::from_engine)
    }

    pub async fn try_clear(&self) -> Result<()> {
        let conn = self.connection().await?;
        conn.clear(self.name).await.map_err(StoreError::from_engine)
    }

    pub async fn get_all(&self) -> Vec<R> {
        match self.try_get_all().await {
            Ok(records) => {
                tracing::debug!(collection = self.name, count = records.len(), "Loaded records");
                records
            }
            Err(e) => {
                self.report("get_all", &e);
                Vec::new()
            }
        }
    }

    pub async fn get_by_id(&self, id: &str) -> Option<R> {
        match self.try_get_by_id(id).await {
            Ok(record) => {
                tracing::debug!(collection = self.name, id, found = record.is_some(), "Looked up record");
                record
            }
            Err(e) => {
                self.report("get_by_id", &e);
                None
            }
        }
    }

    pub async fn put(&self, record: &R) -> bool {
        match self.try_put(record).await {
            Ok(()) => {
                tracing::info!(collection = self.name, key = record.record_key(), "Saved record");
                true
            }
            Err(e) => {
                self.report("put", &e);
                false
            }
        }
    }

    pub async fn put_many(&self, records: &[R]) -> bool {
        match self.try_put_many(records).await {
            Ok(()) => {
                tracing::info!(collection = self.name, count = records.len(), "Saved records");
                true
            }
            Err(e) => {
                self.report("put_many", &e);
                false
            }
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        match self.try_remove(id).await {
            Ok(()) => {
                tracing::info!(collection = self.name, id, "Removed record");
                true
            }
            Err(e) => {
                self.report("remove", &e);
                false
            }
        }
    }

    pub async fn clear(&self) -> bool {
        match self.try_clear().await {
            Ok(()) => {
                tracing::info!(collection = self.name, "Cleared collection");
                true
            }
            Err(e) => {
                self.report("clear", &e);
                false
            }
        }
    }

    fn report(&self, operation: &str, err: &StoreError) {
        match err {
            StoreError::ConnectionUnavailable { .. } => {
                tracing::warn!(collection = self.name, operation, "Database not available");
            }
            _ => {
                tracing::error!(collection = self.name, operation, error = %err, "Collection operation failed");
            }
        }
    }
}

impl<R> Clone for Collection<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            connections: self.connections.clone(),
            _record: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Story, UserDataEntry};
    use crate::schema::{BOOKMARKS, STORIES, USER_DATA};
    use crate::testing::{test_config, FlakyEngine};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn stories(engine: Arc<FlakyEngine>, version: u32) -> Collection<Story> {
        Collection::new(STORIES, ConnectionManager::new(engine, &test_config(version)))
    }

    fn full_story(id: &str) -> Story {
        let mut story = Story::new(id, "Dimas");
        story.description = Some("Lorem ipsum".to_string());
        story.photo_url = Some("https://example.com/1.jpg".to_string());
        story.created_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap());
        story.lat = Some(-6.2);
        story.lon = Some(106.8);
        story.user_id = Some("user-1".to_string());
        story.extra.insert("likes".to_string(), json!(3));
        story
    }

    #[tokio::test]
    async fn test_put_then_get_returns_equal_record() {
        let collection = stories(Arc::new(FlakyEngine::new()), 2);
        let story = full_story("s1");

        assert!(collection.put(&story).await);
        assert_eq!(collection.get_by_id("s1").await, Some(story));
        assert_eq!(collection.get_by_id("missing").await, None);
    }

    #[tokio::test]
    async fn test_coordinates_round_trip_exactly() {
        let collection = stories(Arc::new(FlakyEngine::new()), 2);

        // Deterministic spread of full-precision doubles
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next_unit = move || {
            seed = seed
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (seed >> 11) as f64 / (1u64 << 53) as f64
        };

        let mut batch: Vec<Story> = (0..2_000)
            .map(|i| {
                let mut story = Story::new(format!("s{i:04}"), "Dimas");
                story.lat = Some(next_unit() * 180.0 - 90.0);
                story.lon = Some(next_unit() * 360.0 - 180.0);
                story
            })
            .collect();
        batch.push({
            let mut story = Story::new("known", "Dimas");
            story.lat = Some(10.938711676632721);
            story.lon = Some(-0.000_000_123_456_789);
            story
        });

        assert!(collection.put_many(&batch).await);

        let mut loaded = collection.get_all().await;
        loaded.sort_by(|a, b| a.id.cmp(&b.id));
        batch.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(loaded, batch);

        assert_eq!(
            collection.get_by_id("known").await.and_then(|s| s.lat),
            Some(10.938711676632721)
        );
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_key() {
        let collection = stories(Arc::new(FlakyEngine::new()), 2);

        assert!(collection.put(&Story::new("s1", "First")).await);
        assert!(collection.put(&Story::new("s1", "Second")).await);

        let all = collection.get_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name.as_deref(), Some("Second"));
    }

    #[tokio::test]
    async fn test_clear_empties_collection() {
        let collection = stories(Arc::new(FlakyEngine::new()), 2);
        assert!(collection.put_many(&[full_story("1"), full_story("2")]).await);

        assert!(collection.clear().await);
        assert!(collection.get_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_put_many_rejects_batch_with_invalid_record() {
        let engine = Arc::new(FlakyEngine::new());
        let collection = stories(engine.clone(), 2);

        let batch = vec![Story::new("r1", "A"), Story::new("", "B"), Story::new("r3", "C")];
        assert!(!collection.put_many(&batch).await);
        assert!(matches!(
            collection.try_put_many(&batch).await,
            Err(StoreError::Validation(_))
        ));

        // Validation runs before any connection is opened
        assert_eq!(engine.opens(), 0);

        assert!(collection.get_all().await.is_empty());
        assert_eq!(collection.get_by_id("r1").await, None);
        assert_eq!(collection.get_by_id("r3").await, None);
    }

    #[tokio::test]
    async fn test_put_many_empty_batch() {
        let collection = stories(Arc::new(FlakyEngine::new()), 2);
        assert!(collection.put_many(&[]).await);
        assert!(collection.get_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let collection = stories(Arc::new(FlakyEngine::new()), 2);
        collection.put(&Story::new("s1", "A")).await;

        assert!(collection.remove("s1").await);
        assert_eq!(collection.get_by_id("s1").await, None);

        // Removing an absent key is not an error
        assert!(collection.remove("s1").await);
        assert!(!collection.remove("").await);
    }

    #[tokio::test]
    async fn test_unavailable_engine_degrades() {
        let collection = stories(Arc::new(FlakyEngine::unavailable()), 2);

        assert!(collection.get_all().await.is_empty());
        assert_eq!(collection.get_by_id("s1").await, None);
        assert!(!collection.put(&Story::new("s1", "A")).await);
        assert!(!collection.put_many(&[Story::new("s1", "A")]).await);
        assert!(!collection.remove("s1").await);
        assert!(!collection.clear().await);

        assert!(matches!(
            collection.try_get_all().await,
            Err(StoreError::ConnectionUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_collection_reports_drift() {
        let engine = Arc::new(FlakyEngine::new());
        let bookmarks: Collection<Story> =
            Collection::new(BOOKMARKS, ConnectionManager::new(engine, &test_config(1)));

        assert!(matches!(
            bookmarks.try_put(&Story::new("s1", "A")).await,
            Err(StoreError::SchemaDrift(name)) if name == BOOKMARKS
        ));
        assert!(!bookmarks.put(&Story::new("s1", "A")).await);
        assert_eq!(bookmarks.get_by_id("s1").await, None);
    }

    #[tokio::test]
    async fn test_unreadable_records_are_skipped() {
        let engine = Arc::new(FlakyEngine::new());
        let manager = ConnectionManager::new(engine, &test_config(2));
        let collection: Collection<Story> = Collection::new(STORIES, manager.clone());

        let conn = manager.acquire().await.unwrap();
        conn.put_all(
            STORIES,
            vec![json!({"id": "bad", "lat": "north"}), json!({"id": "good"})],
        )
        .await
        .unwrap();

        let all = collection.get_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "good");
        assert_eq!(collection.get_by_id("bad").await, None);
    }

    #[tokio::test]
    async fn test_user_data_collection() {
        let engine = Arc::new(FlakyEngine::new());
        let collection: Collection<UserDataEntry> =
            Collection::new(USER_DATA, ConnectionManager::new(engine, &test_config(1)));

        let entry = UserDataEntry::new("prefs", json!({"theme": "dark"}));
        assert!(collection.put(&entry).await);
        assert_eq!(collection.get_by_id("prefs").await, Some(entry));
    }
}
