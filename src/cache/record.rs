use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last known size of a repository's default-branch tree.
///
/// Serialized field names are kept short (`size`, `sha`, `timestamp` in epoch
/// milliseconds, `truncated`) to stay compatible with existing cache files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(rename = "sha")]
    pub commit_sha: String,
    /// Records written without a timestamp read as computed at the epoch,
    /// which sends them through revalidation.
    #[serde(
        rename = "timestamp",
        with = "chrono::serde::ts_milliseconds",
        default = "epoch"
    )]
    pub computed_at: DateTime<Utc>,
    #[serde(default)]
    pub truncated: bool,
}

fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

impl CacheRecord {
    pub fn new(
        size_bytes: u64,
        commit_sha: impl Into<String>,
        truncated: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            size_bytes,
            commit_sha: commit_sha.into(),
            computed_at: now,
            truncated,
        }
    }

    /// Time elapsed since the record was computed or last revalidated.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.computed_at
    }

    /// Same record with `computed_at` moved to `now`.
    pub fn refreshed(&self, now: DateTime<Utc>) -> Self {
        Self {
            computed_at: now,
            ..self.clone()
        }
    }
}
