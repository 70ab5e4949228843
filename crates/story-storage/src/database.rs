//! SQLite-backed engine

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::engine::{CollectionSchema, Engine, EngineConnection};
use crate::error::StorageError;
use crate::migrations::{load_collections, run_upgrade};
use crate::Result;

pub struct SqliteEngine {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEngine {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable foreign keys
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // WAL mode for better concurrent performance
        let _: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl Clone for SqliteEngine {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

/// Run blocking SQLite work off the async executor.
async fn blocking<F, T>(conn: Arc<Mutex<Connection>>, f: F) -> Result<T>
where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = conn.lock();
        f(&mut conn)
    })
    .await
    .map_err(|e| StorageError::Task(e.to_string()))?
}

#[async_trait]
impl Engine for SqliteEngine {
    async fn open(
        &self,
        version: u32,
        collections: &[CollectionSchema],
    ) -> Result<Arc<dyn EngineConnection>> {
        let requested = collections.to_vec();
        let (previous, catalogue) = blocking(Arc::clone(&self.conn), move |conn| {
            let previous = run_upgrade(conn, version, &requested)?;
            let catalogue = load_collections(conn)?;
            Ok((previous, catalogue))
        })
        .await?;

        tracing::debug!(
            previous_version = previous,
            version,
            collections = catalogue.len(),
            "Opened SQLite engine"
        );

        Ok(Arc::new(SqliteConnection {
            conn: Arc::clone(&self.conn),
            version,
            collections: catalogue
                .into_iter()
                .map(|c| (c.name, c.key_path))
                .collect(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A handle pinned to the schema seen at open time
pub struct SqliteConnection {
    conn: Arc<Mutex<Connection>>,
    version: u32,
    /// Collection name -> key path
    collections: BTreeMap<String, String>,
    closed: AtomicBool,
}

impl SqliteConnection {
    fn key_path(&self, collection: &str) -> Result<String> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }

        self.collections
            .get(collection)
            .cloned()
            .ok_or_else(|| StorageError::CollectionNotFound(collection.to_string()))
    }
}

fn extract_key(record: &Value, key_path: &str) -> Option<String> {
    match record.get(key_path)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl EngineConnection for SqliteConnection {
    fn version(&self) -> u32 {
        self.version
    }

    fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>> {
        self.key_path(collection)?;
        let collection = collection.to_string();

        blocking(Arc::clone(&self.conn), move |conn| {
            let mut stmt = conn
                .prepare("SELECT value FROM records WHERE collection = ?1 ORDER BY key")?;
            let raw = stmt
                .query_map([&collection], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut values = Vec::with_capacity(raw.len());
            for json in raw {
                values.push(serde_json::from_str(&json)?);
            }
            Ok(values)
        })
        .await
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        self.key_path(collection)?;
        let collection = collection.to_string();
        let key = key.to_string();

        blocking(Arc::clone(&self.conn), move |conn| {
            let json: Option<String> = conn
                .query_row(
                    "SELECT value FROM records WHERE collection = ?1 AND key = ?2",
                    [&collection, &key],
                    |row| row.get(0),
                )
                .optional()?;

            match json {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn put_all(&self, collection: &str, records: Vec<Value>) -> Result<()> {
        let key_path = self.key_path(collection)?;
        let collection = collection.to_string();

        blocking(Arc::clone(&self.conn), move |conn| {
            let tx = conn.transaction()?;
            let updated_at = Utc::now().to_rfc3339();

            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO records (collection, key, value, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;

                for record in &records {
                    let key = extract_key(record, &key_path).ok_or_else(|| {
                        StorageError::MissingKey {
                            collection: collection.clone(),
                            key_path: key_path.clone(),
                        }
                    })?;
                    let json = serde_json::to_string(record)?;
                    stmt.execute(rusqlite::params![collection, key, json, updated_at])?;
                }
            }

            // Dropping `tx` on any early return above rolls the batch back
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        self.key_path(collection)?;
        let collection = collection.to_string();
        let key = key.to_string();

        blocking(Arc::clone(&self.conn), move |conn| {
            conn.execute(
                "DELETE FROM records WHERE collection = ?1 AND key = ?2",
                [&collection, &key],
            )?;
            Ok(())
        })
        .await
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        self.key_path(collection)?;
        let collection = collection.to_string();

        blocking(Arc::clone(&self.conn), move |conn| {
            conn.execute("DELETE FROM records WHERE collection = ?1", [&collection])?;
            Ok(())
        })
        .await
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
