//! Story Store primary engine
//!
//! A versioned, transactional store of keyed JSON collections.
//! Schema upgrades are additive: an open at a higher version creates the
//! collections it names, an open at a lower version is refused.

mod database;
mod engine;
mod error;
mod migrations;

pub use database::SqliteEngine;
pub use engine::{CollectionSchema, Engine, EngineConnection};
pub use error::StorageError;

pub type Result<T> = std::result::Result<T, StorageError>;
