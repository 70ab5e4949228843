//! Schema versioning
//!
//! The engine keeps its own metadata tables: the stored schema version, the
//! collection catalogue, and one records table shared by all collections.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::engine::CollectionSchema;
use crate::error::StorageError;
use crate::Result;

fn ensure_meta_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            key_path TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS records (
            collection TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (collection, key),
            FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
        );
    "#,
    )?;
    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32> {
    let version = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Returns true when the collection did not exist before.
fn create_collection(conn: &Connection, schema: &CollectionSchema) -> Result<bool> {
    let created = conn.execute(
        "INSERT OR IGNORE INTO collections (name, key_path, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![schema.name, schema.key_path, Utc::now().to_rfc3339()],
    )?;
    Ok(created == 1)
}

/// Bring the database to `version`, creating missing collections.
///
/// Returns the version that was stored before the call.
pub fn run_upgrade(
    conn: &mut Connection,
    version: u32,
    collections: &[CollectionSchema],
) -> Result<u32> {
    if version == 0 {
        return Err(StorageError::InvalidVersion(version));
    }

    let tx = conn.transaction()?;
    ensure_meta_schema(&tx)?;

    let stored = get_schema_version(&tx)?;
    if version < stored {
        return Err(StorageError::VersionMismatch {
            requested: version,
            stored,
        });
    }

    if version > stored {
        tracing::info!(from = stored, to = version, "Upgrading database schema");

        for schema in collections {
            if create_collection(&tx, schema)? {
                tracing::info!(
                    collection = %schema.name,
                    key_path = %schema.key_path,
                    "Created collection"
                );
            }
        }

        set_schema_version(&tx, version)?;
    }

    tx.commit()?;
    Ok(stored)
}

pub fn load_collections(conn: &Connection) -> Result<Vec<CollectionSchema>> {
    let mut stmt = conn.prepare("SELECT name, key_path FROM collections ORDER BY name")?;
    let collections = stmt
        .query_map([], |row| {
            Ok(CollectionSchema {
                name: row.get(0)?,
                key_path: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(collections)
}
