//! Record types stored in each collection

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::Result;

/// A value stored under a unique key field
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name of the key field, matching the collection's key path
    const KEY_PATH: &'static str;

    fn record_key(&self) -> &str;

    /// Writes are refused unless the key field is non-empty.
    fn validate(&self) -> Result<()> {
        if self.record_key().trim().is_empty() {
            return Err(StoreError::Validation(format!(
                "record is missing required '{}'",
                Self::KEY_PATH
            )));
        }
        Ok(())
    }
}

/// A story as cached from the remote API
///
/// Bookmarks use the same shape. Fields the remote adds that are not modelled
/// here are kept in `extra` so records round-trip intact.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Story {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn has_location(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }
}

impl Record for Story {
    const KEY_PATH: &'static str = "id";

    fn record_key(&self) -> &str {
        &self.id
    }
}

/// A generic settings or cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDataEntry {
    pub key: String,
    pub data: Value,
}

impl UserDataEntry {
    pub fn new(key: impl Into<String>, data: Value) -> Self {
        Self {
            key: key.into(),
            data,
        }
    }
}

impl Record for UserDataEntry {
    const KEY_PATH: &'static str = "key";

    fn record_key(&self) -> &str {
        &self.key
    }
}
