//! Story Store simple key-value store
//!
//! A synchronous string-to-string store used as the fallback mirror for
//! user data. Values are opaque strings; JSON helpers live on
//! [`SimpleStoreExt`].

mod error;
mod file;
mod memory;
mod store;

pub use error::KvError;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{SimpleStore, SimpleStoreExt};

pub type Result<T> = std::result::Result<T, KvError>;
