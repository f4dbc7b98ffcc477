use chrono::{DateTime, Local, Utc};
use thiserror::Error;

/// Failure of a single remote API operation.
///
/// Every variant is terminal for the invocation that produced it; nothing in
/// the crate retries.  Credential failures additionally make the caller
/// clear the stored token and ask for a new one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("PAT Required")]
    MissingCredential,

    #[error("Invalid PAT")]
    InvalidCredential,

    /// HTTP 403.  `reset_at` is only known when the response reported an
    /// exhausted rate-limit window.
    #[error("{}", rate_limited_message(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    #[error("Repository not found or PAT lacks access.")]
    NotFound,

    #[error("Failed to parse API response: {0}")]
    MalformedResponse(String),

    #[error("Network error during API request: {0}")]
    Network(String),

    #[error("API request timed out.")]
    Timeout,

    /// The tree listing was truncated before a single entry was returned.
    #[error("Repo likely too large for basic tree API. Size unavailable.")]
    UnsupportedRepoSize,

    #[error("API request failed with status {code}: {reason}")]
    Status { code: u16, reason: String },
}

impl ApiError {
    /// `true` for the failures that require a new credential from the user.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, Self::MissingCredential | Self::InvalidCredential)
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::InvalidCredential => "invalid_credential",
            Self::RateLimited { .. } => "rate_limited",
            Self::NotFound => "not_found",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Network(_) => "network",
            Self::Timeout => "timeout",
            Self::UnsupportedRepoSize => "unsupported_repo_size",
            Self::Status { .. } => "status",
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::MalformedResponse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

fn rate_limited_message(reset_at: &Option<DateTime<Utc>>) -> String {
    let base = "API rate limit exceeded or insufficient permissions.";
    match reset_at {
        Some(at) => format!(
            "{base} Limit resets at {}.",
            at.with_timezone(&Local).format("%H:%M:%S")
        ),
        None => format!("{base} Check PAT permissions (needs `repo` scope)."),
    }
}
