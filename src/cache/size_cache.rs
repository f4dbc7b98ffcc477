//! Size cache over the key-value store.
//!
//! The whole map lives under [`SIZE_CACHE_KEY`].  Every write is a
//! read-modify-write of the full map; a single page context is the only
//! writer, so no finer locking is needed.  Entries are decoded one at a
//! time: an entry that does not decode is skipped on read and left untouched
//! on write.  Only a document that is not a JSON object at all is reset.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::storage::{KeyValueStore, SIZE_CACHE_KEY};

use super::CacheRecord;

type RawMap = BTreeMap<String, Value>;

#[derive(Clone)]
pub struct SizeCache {
    store: Arc<dyn KeyValueStore>,
}

impl SizeCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Look up the record for `key` (`owner/name`).
    pub fn get(&self, key: &str) -> Result<Option<CacheRecord>> {
        let record = self
            .load()?
            .remove(key)
            .and_then(|value| decode(key, value));
        trace!(key, hit = record.is_some(), "size cache lookup");
        Ok(record)
    }

    /// Store `record` under `key`, replacing any previous record.
    pub fn put(&self, key: &str, record: &CacheRecord) -> Result<()> {
        let mut map = self.load()?;
        let value = serde_json::to_value(record).context("failed to encode size record")?;
        map.insert(key.to_string(), value);
        self.save(&map)?;
        debug!(
            key,
            size_bytes = record.size_bytes,
            commit_sha = %record.commit_sha,
            "size cache updated"
        );
        Ok(())
    }

    /// All readable records, ordered by key.
    pub fn entries(&self) -> Result<Vec<(String, CacheRecord)>> {
        Ok(self
            .load()?
            .into_iter()
            .filter_map(|(key, value)| decode(&key, value).map(|record| (key, record)))
            .collect())
    }

    /// Drop every record.  Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let count = self.load()?.len();
        self.save(&RawMap::new())?;
        debug!(count, "size cache cleared");
        Ok(count)
    }

    fn load(&self) -> Result<RawMap> {
        let Some(raw) = self.store.get(SIZE_CACHE_KEY)? else {
            return Ok(RawMap::new());
        };
        if raw.trim().is_empty() {
            return Ok(RawMap::new());
        }
        match serde_json::from_str(&raw) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(error = %e, "size cache is unreadable, resetting");
                self.save(&RawMap::new())?;
                Ok(RawMap::new())
            }
        }
    }

    fn save(&self, map: &RawMap) -> Result<()> {
        let raw = serde_json::to_string(map).context("failed to encode size cache")?;
        self.store
            .set(SIZE_CACHE_KEY, &raw)
            .context("failed to write size cache")
    }
}

fn decode(key: &str, value: Value) -> Option<CacheRecord> {
    match serde_json::from_value(value) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(key, error = %e, "skipping unreadable size cache record");
            None
        }
    }
}
