//! Revalidation/fetch engine.
//!
//! For one repository the engine decides between three paths:
//!
//! | Cache state              | Remote calls        | Result                     |
//! |--------------------------|---------------------|----------------------------|
//! | record younger than TTL  | none                | cached size                |
//! | older, head unchanged    | head lookup         | cached size, timestamp bump|
//! | older with new head/none | head lookup + tree  | new record                 |
//!
//! Intermediate states (`Validating`, `Loading`) are reported through the
//! `emit` callback; the terminal state is the return value.

pub mod clock;
pub mod format;

pub use clock::{Clock, SystemClock};

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheRecord, SizeCache};
use crate::credentials::{secret_fingerprint, CredentialStore};
use crate::forge::{ApiError, RemoteClient, RepoIdentity};
use crate::metrics::{Metrics, Outcome, RevalidationResult};

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Display state of the size element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeState {
    Idle,
    Loading,
    Validating,
    Displaying { size_bytes: u64, approximate: bool },
    /// No usable credential.  `invalid` is set when the API rejected the one
    /// that was stored.
    CredentialRequired { invalid: bool },
    Error(String),
}

impl SizeState {
    /// Whether an invocation ends in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Displaying { .. } | Self::CredentialRequired { .. } | Self::Error(_)
        )
    }

    fn from_record(record: &CacheRecord) -> Self {
        Self::Displaying {
            size_bytes: record.size_bytes,
            approximate: record.truncated,
        }
    }
}

/// Result of checking an aged record against the remote head commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revalidation {
    /// Head commit unchanged; the record still holds.
    Fresh,
    /// Head moved to the contained sha; the record must be recomputed.
    Stale(String),
    Failed(ApiError),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    remote: Arc<dyn RemoteClient>,
    credentials: CredentialStore,
    cache: SizeCache,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    metrics: Arc<Metrics>,
}

impl Engine {
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        credentials: CredentialStore,
        cache: SizeCache,
        clock: Arc<dyn Clock>,
        ttl: chrono::Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            remote,
            credentials,
            cache,
            clock,
            ttl,
            metrics,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Resolve the size of `repo`, reporting intermediate states through
    /// `emit` and returning the terminal one.
    #[instrument(skip(self, emit), fields(repo = %repo))]
    pub async fn resolve<F>(&self, repo: &RepoIdentity, emit: &F) -> SizeState
    where
        F: Fn(SizeState) + Send + Sync,
    {
        let state = self.run(repo, emit).await;
        self.metrics.record_outcome(match state {
            SizeState::CredentialRequired { .. } => Outcome::CredentialRequired,
            SizeState::Error(_) => Outcome::Error,
            _ => Outcome::Displayed,
        });
        state
    }

    async fn run<F>(&self, repo: &RepoIdentity, emit: &F) -> SizeState
    where
        F: Fn(SizeState) + Send + Sync,
    {
        let Some(token) = self.credentials.get() else {
            info!("no credential stored");
            return SizeState::CredentialRequired { invalid: false };
        };
        debug!(fingerprint = %secret_fingerprint(&token), "using stored credential");

        let key = repo.key();
        let cached = self.cache.get(&key).unwrap_or_else(|e| {
            warn!(error = %e, "size cache read failed, treating as miss");
            None
        });

        let known_sha = match cached {
            None => {
                debug!("no cached size");
                None
            }
            Some(record) => {
                let age = record.age(self.clock.now());
                if age < self.ttl {
                    self.metrics.cache_hits.inc();
                    debug!(age_secs = age.num_seconds(), "cached size is fresh");
                    return SizeState::from_record(&record);
                }

                debug!(
                    age_secs = age.num_seconds(),
                    cached_sha = %record.commit_sha,
                    "cached size aged out, revalidating"
                );
                emit(SizeState::Validating);
                match self.revalidate(repo, &record).await {
                    Revalidation::Fresh => {
                        let refreshed = record.refreshed(self.clock.now());
                        self.store(&key, &refreshed);
                        return SizeState::from_record(&refreshed);
                    }
                    Revalidation::Stale(sha) => Some(sha),
                    Revalidation::Failed(err) => return self.fail(err),
                }
            }
        };

        emit(SizeState::Loading);
        match self.fetch(repo, known_sha).await {
            Ok(record) => {
                self.store(&key, &record);
                SizeState::from_record(&record)
            }
            Err(err) => self.fail(err),
        }
    }

    /// Compare the record's commit with the current head.  One remote call.
    pub async fn revalidate(&self, repo: &RepoIdentity, record: &CacheRecord) -> Revalidation {
        match self.remote.default_branch_head_sha(repo).await {
            Ok(sha) if sha == record.commit_sha => {
                self.metrics.record_revalidation(RevalidationResult::Fresh);
                debug!(%sha, "head unchanged, keeping cached size");
                Revalidation::Fresh
            }
            Ok(sha) => {
                self.metrics.record_revalidation(RevalidationResult::Stale);
                debug!(cached_sha = %record.commit_sha, head_sha = %sha, "head moved");
                Revalidation::Stale(sha)
            }
            Err(err) => {
                self.metrics.record_revalidation(RevalidationResult::Failed);
                Revalidation::Failed(err)
            }
        }
    }

    /// Compute a fresh record.  `known_sha` skips the head lookup when the
    /// revalidation step already observed it.
    async fn fetch(
        &self,
        repo: &RepoIdentity,
        known_sha: Option<String>,
    ) -> Result<CacheRecord, ApiError> {
        self.metrics.full_fetches.inc();
        let sha = match known_sha {
            Some(sha) => sha,
            None => self.remote.default_branch_head_sha(repo).await?,
        };
        let size = self.remote.tree_size(repo, &sha).await?;
        info!(
            commit_sha = %sha,
            size_bytes = size.size_bytes,
            truncated = size.truncated,
            "repository size computed"
        );
        Ok(CacheRecord::new(size.size_bytes, sha, size.truncated, self.clock.now()))
    }

    fn store(&self, key: &str, record: &CacheRecord) {
        if let Err(e) = self.cache.put(key, record) {
            warn!(key, error = %e, "failed to write size cache");
        }
    }

    fn fail(&self, err: ApiError) -> SizeState {
        if err.is_credential_failure() {
            warn!(error = %err, "credential unusable, clearing stored credential");
            if let Err(e) = self.credentials.clear() {
                warn!(error = %e, "failed to clear stored credential");
            }
            return SizeState::CredentialRequired {
                invalid: err == ApiError::InvalidCredential,
            };
        }

        warn!(kind = err.kind(), error = %err, "size lookup failed");
        SizeState::Error(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
