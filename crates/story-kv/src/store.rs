use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;

pub trait SimpleStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Returns true if the key was present.
    fn remove(&self, key: &str) -> Result<bool>;

    /// Keys starting with `prefix`, sorted
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

pub trait SimpleStoreExt: SimpleStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(Into::into)
    }

    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)
    }

    /// Remove every key under `prefix`, returning how many were removed.
    fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let mut removed = 0;
        for key in self.keys_with_prefix(prefix)? {
            if self.remove(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl<S: SimpleStore + ?Sized> SimpleStoreExt for S {}
