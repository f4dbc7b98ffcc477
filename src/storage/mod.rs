//! Persistent key-value storage.
//!
//! The credential and the size cache are both plain string values in a
//! host-provided store with get/set semantics and no transactions across
//! keys.  [`FileStore`] keeps them in a single JSON document on disk;
//! [`MemoryStore`] keeps them in process.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use anyhow::Result;

/// Store key holding the access token.
pub const CREDENTIAL_KEY: &str = "github_pat_repo_size";

/// Store key holding the JSON-encoded size cache map.
pub const SIZE_CACHE_KEY: &str = "repoSizeCache";

/// Host-provided persistent string store.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored under `key`.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}
