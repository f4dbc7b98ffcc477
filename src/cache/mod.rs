//! Persistent per-repository size cache.
//!
//! One [`CacheRecord`] per `owner/name` key, stored as a single JSON map in
//! the key-value store.  Records are only meaningful together with the commit
//! they were computed against; freshness policy lives in the engine.

pub mod record;
pub mod size_cache;

pub use record::CacheRecord;
pub use size_cache::SizeCache;
