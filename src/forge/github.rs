//! GitHub REST API client.
//!
//! Three endpoints are used:
//!
//! | Call                                         | Purpose                  |
//! |----------------------------------------------|--------------------------|
//! | `GET /repos/{owner}/{name}`                  | default branch name      |
//! | `GET /repos/{owner}/{name}/branches/{branch}`| head commit of a branch  |
//! | `GET /repos/{owner}/{name}/git/trees/{sha}`  | recursive file listing   |
//!
//! The token is read from the [`CredentialStore`] on every request so that a
//! token cleared or replaced mid-session takes effect immediately.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::header::ACCEPT;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::config::ApiConfig;
use crate::credentials::CredentialStore;
use crate::metrics::{Endpoint, Metrics};

use super::rate_limit::{self, RateLimitState};
use super::{ApiError, RemoteClient, RepoIdentity, TreeSize};

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RepoResponse {
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    commit: BranchCommit,
}

#[derive(Debug, Deserialize)]
struct BranchCommit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Option<Vec<TreeEntry>>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    size: Option<u64>,
}

// ---------------------------------------------------------------------------
// Client struct
// ---------------------------------------------------------------------------

pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    accept: String,
    credentials: CredentialStore,
    rate_limit: RateLimitState,
    metrics: Arc<Metrics>,
}

impl GitHubClient {
    pub fn new(
        config: &ApiConfig,
        credentials: CredentialStore,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_url: config.url.trim_end_matches('/').to_string(),
            accept: config.accept.clone(),
            credentials,
            rate_limit: RateLimitState::new(),
            metrics,
        })
    }

    pub fn rate_limit(&self) -> &RateLimitState {
        &self.rate_limit
    }

    /// Issue one authenticated GET and decode the JSON body, classifying
    /// every non-success status.
    async fn get_json<T>(&self, url: &str, endpoint: Endpoint) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let token = self.credentials.get().ok_or(ApiError::MissingCredential)?;

        self.metrics.record_api_call(endpoint);
        let resp = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .header(ACCEPT, self.accept.as_str())
            .send()
            .await?;

        if let Some(remaining) = self.rate_limit.update_from_headers(resp.headers()) {
            self.metrics
                .rate_limit_remaining
                .set(i64::try_from(remaining).unwrap_or(i64::MAX));
        }

        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            return serde_json::from_str(&body)
                .map_err(|e| ApiError::MalformedResponse(e.to_string()));
        }

        let err = match status.as_u16() {
            401 => ApiError::InvalidCredential,
            403 => ApiError::RateLimited {
                reset_at: rate_limit::exhausted_reset(resp.headers()),
            },
            404 => ApiError::NotFound,
            code => ApiError::Status {
                code,
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            },
        };
        warn!(
            %url,
            %status,
            retry_after_secs = self.rate_limit.retry_after_secs(),
            error = %err,
            "API request failed"
        );
        Err(err)
    }
}

// ---------------------------------------------------------------------------
// Trait implementation
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl RemoteClient for GitHubClient {
    #[instrument(skip(self), fields(repo = %repo))]
    async fn default_branch_head_sha(&self, repo: &RepoIdentity) -> Result<String, ApiError> {
        let repo_url = format!("{}/repos/{}/{}", self.api_url, repo.owner(), repo.name());
        let info: RepoResponse = self.get_json(&repo_url, Endpoint::Repo).await?;

        let branch = info
            .default_branch
            .filter(|b| !b.is_empty())
            .ok_or_else(|| {
                ApiError::MalformedResponse("could not determine default branch".to_string())
            })?;
        debug!(%branch, "default branch resolved, fetching head commit");

        let head_url = branch_url(&repo_url, &branch)?;
        let branch_info: BranchResponse = self.get_json(&head_url, Endpoint::Branch).await?;
        Ok(branch_info.commit.sha)
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn tree_size(&self, repo: &RepoIdentity, commit_sha: &str) -> Result<TreeSize, ApiError> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{commit_sha}?recursive=1",
            self.api_url,
            repo.owner(),
            repo.name()
        );

        let listing: TreeResponse = match self.get_json(&url, Endpoint::Tree).await {
            Ok(listing) => listing,
            Err(ApiError::NotFound) => {
                // An empty repository has metadata but no tree.
                debug!(commit_sha, "tree not found, treating repository as empty");
                return Ok(TreeSize {
                    size_bytes: 0,
                    truncated: false,
                });
            }
            Err(e) => return Err(e),
        };

        let size = sum_tree(listing)?;
        debug!(
            commit_sha,
            size_bytes = size.size_bytes,
            truncated = size.truncated,
            "tree size computed"
        );
        Ok(size)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// URL of `branch` under `repo_url`.  The branch name is one path segment,
/// percent-encoded, whatever characters it contains.
fn branch_url(repo_url: &str, branch: &str) -> Result<String, ApiError> {
    let mut url = reqwest::Url::parse(repo_url)
        .map_err(|e| ApiError::Network(format!("invalid API url {repo_url}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| ApiError::Network(format!("API url cannot carry a path: {repo_url}")))?
        .pop_if_empty()
        .push("branches")
        .push(branch);
    Ok(url.to_string())
}

/// Sum the sizes of all blob entries.  Directories (`tree`) and submodules
/// (`commit`) carry no size of their own.
fn sum_tree(listing: TreeResponse) -> Result<TreeSize, ApiError> {
    let entries = listing.tree.unwrap_or_default();
    if listing.truncated && entries.is_empty() {
        return Err(ApiError::UnsupportedRepoSize);
    }

    let size_bytes = entries
        .iter()
        .filter(|e| e.kind == "blob")
        .filter_map(|e| e.size)
        .fold(0u64, u64::saturating_add);

    Ok(TreeSize {
        size_bytes,
        truncated: listing.truncated,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
