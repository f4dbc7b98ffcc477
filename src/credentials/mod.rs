//! Access-token storage and acquisition.
//!
//! A single bearer token is kept in the persistent store under
//! [`CREDENTIAL_KEY`].  An empty stored value is the explicit "cleared"
//! state and reads back as absent.

pub mod prompt;

pub use prompt::{CredentialPrompt, NoPrompt, TerminalPrompt};

use std::sync::Arc;

use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::storage::{KeyValueStore, CREDENTIAL_KEY};

/// Persistent store for the API access token.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Return the stored token, or `None` when absent or cleared.
    ///
    /// A store read failure is logged and treated as absent.
    pub fn get(&self) -> Option<SecretString> {
        match self.store.get(CREDENTIAL_KEY) {
            Ok(Some(token)) if !token.trim().is_empty() => Some(SecretString::from(token)),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "failed to read stored credential");
                None
            }
        }
    }

    /// Store a new token.  Surrounding whitespace is trimmed; an empty result
    /// clears the stored token instead and returns `false`.
    pub fn set(&self, raw: &str) -> Result<bool> {
        let token = raw.trim();
        if token.is_empty() {
            self.store.set(CREDENTIAL_KEY, "")?;
            info!("empty credential input, stored credential cleared");
            return Ok(false);
        }

        self.store.set(CREDENTIAL_KEY, token)?;
        info!(fingerprint = %fingerprint(token), "credential saved");
        Ok(true)
    }

    /// Drop the stored token, e.g. after the API rejected it.
    pub fn clear(&self) -> Result<()> {
        self.store.set(CREDENTIAL_KEY, "")?;
        debug!("stored credential cleared");
        Ok(())
    }
}

/// Short, log-safe identifier for a token: the first 12 hex digits of its
/// SHA-256 digest.  The raw token never reaches the logs.
pub fn fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(12);
    digest
}

/// Convenience for logging the fingerprint of a stored secret.
pub fn secret_fingerprint(token: &SecretString) -> String {
    fingerprint(token.expose_secret())
}
