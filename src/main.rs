mod cache;
mod config;
mod credentials;
mod display;
mod engine;
mod forge;
mod metrics;
mod page;
mod storage;
#[cfg(test)]
mod testing;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::cache::SizeCache;
use crate::config::Config;
use crate::credentials::{CredentialPrompt, CredentialStore, NoPrompt, TerminalPrompt};
use crate::display::{DisplaySlot, TerminalRenderer};
use crate::engine::format::format_size;
use crate::engine::{Engine, SystemClock};
use crate::forge::{GitHubClient, RepoIdentity};
use crate::metrics::MetricsRegistry;
use crate::page::{EngineSession, HostEvent, PageSnapshot};
use crate::storage::{FileStore, KeyValueStore, MemoryStore};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "reposize", about = "Annotate GitHub repositories with their size")]
struct Cli {
    /// Path to the YAML configuration file.  Defaults apply when omitted.
    #[arg(short, long, env = "REPOSIZE_CONFIG")]
    config: Option<PathBuf>,

    /// Keep the credential and the size cache in memory only.
    #[arg(long)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve and print the size of one repository.
    Show {
        /// Repository as `owner/name`.
        repo: String,
    },
    /// Follow host events read as JSON lines from stdin.
    Watch {
        /// Print the metrics exposition once input ends.
        #[arg(long)]
        print_metrics: bool,
    },
    /// Manage the stored access token.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Inspect or reset the size cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum TokenAction {
    /// Store a token.  Read from stdin when VALUE is omitted; empty clears.
    Set { value: Option<String> },
    /// Remove the stored token.
    Clear,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Print every cached record.
    List,
    /// Remove every cached record.
    Clear,
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Everything a command needs, built from the config.
struct App {
    config: Config,
    credentials: CredentialStore,
    cache: SizeCache,
    metrics: MetricsRegistry,
}

impl App {
    fn new(config: Config, ephemeral: bool) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = if ephemeral {
            tracing::info!("using in-memory state");
            Arc::new(MemoryStore::new())
        } else {
            let file = FileStore::open(&config.storage.path)?;
            tracing::debug!(path = %file.path().display(), "state store opened");
            Arc::new(file)
        };

        Ok(Self {
            credentials: CredentialStore::new(store.clone()),
            cache: SizeCache::new(store),
            metrics: MetricsRegistry::new(),
            config,
        })
    }

    fn session(
        &self,
        renderer: Arc<TerminalRenderer>,
        prompt: Arc<dyn CredentialPrompt>,
    ) -> Result<(EngineSession, Arc<GitHubClient>)> {
        let client = Arc::new(GitHubClient::new(
            &self.config.api,
            self.credentials.clone(),
            self.metrics.metrics.clone(),
        )?);
        tracing::info!(api_url = %self.config.api.url, "GitHub client initialised");

        let engine = Engine::new(
            client.clone(),
            self.credentials.clone(),
            self.cache.clone(),
            Arc::new(SystemClock),
            self.config.cache.ttl()?,
            self.metrics.metrics.clone(),
        );
        let session = EngineSession::new(
            Arc::new(engine),
            DisplaySlot::new(renderer),
            prompt,
            self.config.session.max_credential_prompts,
        );
        Ok((session, client))
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn show(app: &App, repo: &str) -> Result<()> {
    let identity = RepoIdentity::parse(repo)
        .with_context(|| format!("expected a repository as owner/name, got {repo:?}"))?;

    let renderer = Arc::new(TerminalRenderer::new());
    renderer.set_subject(Some(identity.key()));
    let (session, client) = app.session(renderer, Arc::new(TerminalPrompt))?;

    let snapshot = PageSnapshot {
        path: format!("/{}/{}", identity.owner(), identity.name()),
        repo_marker: true,
        landmark: true,
    };
    if let Some(handle) = session.navigate(&snapshot) {
        handle.await.context("size lookup task failed")?;
    }

    log_rate_limit(&client);
    Ok(())
}

async fn watch(app: &App, print_metrics: bool) -> Result<()> {
    let renderer = Arc::new(TerminalRenderer::new());
    let (session, client) = app.session(renderer, Arc::new(NoPrompt))?;

    let (tx, rx) = mpsc::channel(64);
    let reader = tokio::task::spawn_blocking(move || -> Result<()> {
        let stdin = std::io::stdin();
        for (number, line) in stdin.lock().lines().enumerate() {
            let line = line.context("failed to read host event")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HostEvent>(&line) {
                Ok(event) => {
                    if tx.blocking_send(event).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(line = number + 1, error = %e, "ignoring malformed host event")
                }
            }
        }
        Ok(())
    });

    session.run(rx).await;
    reader.await.context("host event reader panicked")??;
    tracing::info!(tracked = ?session.tracked_key(), "host input closed");

    log_rate_limit(&client);
    if print_metrics {
        print!("{}", app.metrics.encode()?);
    }
    Ok(())
}

fn token(app: &App, action: TokenAction) -> Result<()> {
    match action {
        TokenAction::Set { value } => {
            let raw = match value {
                Some(value) => value,
                None => {
                    let mut line = String::new();
                    std::io::stdin()
                        .lock()
                        .read_line(&mut line)
                        .context("failed to read token from stdin")?;
                    line
                }
            };
            if app.credentials.set(&raw)? {
                println!("token saved");
            } else {
                println!("empty token, stored token cleared");
            }
        }
        TokenAction::Clear => {
            app.credentials.clear()?;
            println!("token cleared");
        }
    }
    Ok(())
}

fn cache(app: &App, action: CacheAction) -> Result<()> {
    match action {
        CacheAction::List => {
            for (key, record) in app.cache.entries()? {
                let sha: String = record.commit_sha.chars().take(12).collect();
                println!(
                    "{key}\t{}\t{sha}\t{}",
                    format_size(record.size_bytes, record.truncated),
                    record.computed_at.to_rfc3339(),
                );
            }
        }
        CacheAction::Clear => {
            let removed = app.cache.clear()?;
            println!("removed {removed} cached record(s)");
        }
    }
    Ok(())
}

fn log_rate_limit(client: &GitHubClient) {
    let rate_limit = client.rate_limit();
    if rate_limit.remaining() == u64::MAX {
        return;
    }
    tracing::info!(
        remaining = rate_limit.remaining(),
        reset_at = rate_limit.reset_at(),
        retry_after_secs = rate_limit.retry_after_secs(),
        "API rate limit"
    );
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    // ---- Config ----
    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    tracing::debug!(
        config_path = ?cli.config,
        state_path = %config.storage.path.display(),
        "config loaded"
    );

    let app = App::new(config, cli.ephemeral)?;

    match cli.command {
        Command::Show { repo } => show(&app, &repo).await,
        Command::Watch { print_metrics } => watch(&app, print_metrics).await,
        Command::Token { action } => token(&app, action),
        Command::Cache { action } => cache(&app, action),
    }
}
