//! Remote API abstraction layer.
//!
//! Provides the [`RemoteClient`] trait that encapsulates every call the size
//! engine makes against the hosting provider.  The engine dispatches through
//! this trait so that no URL construction or response parsing leaks outside
//! this module, and so tests can script the remote side.

pub mod error;
pub mod github;
pub mod rate_limit;

pub use error::ApiError;
pub use github::GitHubClient;

use std::fmt;

// ---------------------------------------------------------------------------
// Repository identity
// ---------------------------------------------------------------------------

/// `owner/name` pair identifying a repository, a cache entry and a remote
/// resource.  Immutable once derived from a page location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoIdentity {
    owner: String,
    name: String,
}

impl RepoIdentity {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse an `owner/name` slug.  Both halves must be non-empty and the
    /// name must not contain another `/`.
    pub fn parse(slug: &str) -> Option<Self> {
        let (owner, name) = slug.trim().trim_matches('/').split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(owner, name))
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cache key, `"owner/name"`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Sum of file sizes of one tree listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeSize {
    pub size_bytes: u64,
    /// The listing was cut off; `size_bytes` is a lower bound.
    pub truncated: bool,
}

/// Read-only operations against the hosting provider.  Every call is a
/// single attempt and needs a stored credential.
#[async_trait::async_trait]
pub trait RemoteClient: Send + Sync {
    /// Head commit of the repository's default branch.  Looks up the default
    /// branch name first, so this is two sequential requests.
    async fn default_branch_head_sha(&self, repo: &RepoIdentity) -> Result<String, ApiError>;

    /// Total blob size of the recursive tree at `commit_sha`.  A tree that
    /// does not exist means an empty repository and yields zero.
    async fn tree_size(&self, repo: &RepoIdentity, commit_sha: &str)
        -> Result<TreeSize, ApiError>;
}
