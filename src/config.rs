use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

// ---------------------------------------------------------------------------
// Remote API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Full URL to the API root (e.g. `https://api.github.com`).
    #[serde(default = "default_api_url")]
    pub url: String,
    /// `Accept` header sent with every API request.
    #[serde(default = "default_accept")]
    pub accept: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Client-wide request timeout in seconds.  A timeout is terminal for
    /// the invocation that hit it.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            accept: default_accept(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_accept() -> String {
    "application/vnd.github.v3+json".to_string()
}

fn default_user_agent() -> String {
    concat!("reposize/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Size cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Age (seconds) below which a cached size is trusted without contacting
    /// the API.  Older records are revalidated against the head commit.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Result<chrono::Duration> {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .with_context(|| format!("cache.ttl_secs out of range: {}", self.ttl_secs))
    }
}

fn default_cache_ttl() -> u64 {
    24 * 60 * 60
}

/// Upper bound for `cache.ttl_secs`: ten years.
const MAX_CACHE_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Persistent state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// JSON document holding the credential and the size cache.
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("reposize")
        .join("state.json")
}

// ---------------------------------------------------------------------------
// Page session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// How many times in a row the user is asked for a credential before the
    /// session settles on the credential-required state.
    #[serde(default = "default_max_credential_prompts")]
    pub max_credential_prompts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_credential_prompts: default_max_credential_prompts(),
        }
    }
}

fn default_max_credential_prompts() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
pub fn validate_config(config: &Config) -> Result<()> {
    let url = reqwest::Url::parse(&config.api.url)
        .with_context(|| format!("invalid api.url: {}", config.api.url))?;
    anyhow::ensure!(
        matches!(url.scheme(), "http" | "https"),
        "api.url must use http or https"
    );
    anyhow::ensure!(config.api.timeout_secs > 0, "api.timeout_secs must be > 0");
    anyhow::ensure!(config.cache.ttl_secs > 0, "cache.ttl_secs must be > 0");
    anyhow::ensure!(
        config.cache.ttl_secs <= MAX_CACHE_TTL_SECS,
        "cache.ttl_secs must be <= {MAX_CACHE_TTL_SECS}"
    );
    anyhow::ensure!(
        config.session.max_credential_prompts >= 1,
        "session.max_credential_prompts must be >= 1"
    );
    Ok(())
}
