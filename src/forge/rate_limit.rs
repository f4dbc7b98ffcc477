//! Upstream API rate-limit tracking.
//!
//! Reads `X-RateLimit-Remaining` / `X-RateLimit-Reset` (or the standardised
//! `RateLimit-Remaining` / `RateLimit-Reset`) from API responses.  The state
//! is informational: nothing self-throttles, it only feeds the metrics gauge
//! and the reset hint of a 403 error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use tracing::debug;

/// Shared rate-limit state updated after every API response.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    /// Remaining API calls before the rate limit resets.
    remaining: Arc<AtomicU64>,
    /// Unix timestamp at which the rate limit window resets.
    reset_at: Arc<AtomicU64>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitState {
    pub fn new() -> Self {
        Self {
            remaining: Arc::new(AtomicU64::new(u64::MAX)),
            reset_at: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current remaining calls; `u64::MAX` until a response reported it.
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Relaxed)
    }

    /// Unix timestamp when the window resets.
    pub fn reset_at(&self) -> u64 {
        self.reset_at.load(Ordering::Relaxed)
    }

    /// Update state from HTTP response headers.  Returns the remaining
    /// count when the response carried one.
    pub fn update_from_headers(&self, headers: &HeaderMap) -> Option<u64> {
        let remaining = remaining_header(headers);
        let reset = reset_header(headers);

        if let Some(r) = remaining {
            self.remaining.store(r, Ordering::Relaxed);
        }
        if let Some(r) = reset {
            self.reset_at.store(r, Ordering::Relaxed);
        }
        if remaining.is_some() || reset.is_some() {
            debug!(?remaining, ?reset, "rate limit headers recorded");
        }
        remaining
    }

    /// Seconds until the window resets, or 0 if already reset.
    pub fn retry_after_secs(&self) -> u64 {
        let reset = self.reset_at.load(Ordering::Relaxed);
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        reset.saturating_sub(now)
    }
}

/// Reset time of an exhausted window: only returned when the response says
/// zero calls remain and names a reset timestamp.
pub fn exhausted_reset(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    if remaining_header(headers)? != 0 {
        return None;
    }
    let reset = i64::try_from(reset_header(headers)?).ok()?;
    DateTime::from_timestamp(reset, 0)
}

fn remaining_header(headers: &HeaderMap) -> Option<u64> {
    header_u64(headers, "X-RateLimit-Remaining", "RateLimit-Remaining")
}

fn reset_header(headers: &HeaderMap) -> Option<u64> {
    header_u64(headers, "X-RateLimit-Reset", "RateLimit-Reset")
}

fn header_u64(headers: &HeaderMap, name: &str, fallback: &str) -> Option<u64> {
    headers
        .get(name)
        .or_else(|| headers.get(fallback))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}
