//! Asking the user for a new access token.

use std::io::{BufRead, Write};

use tracing::warn;

/// External collaborator that asks the user for a token.
///
/// `None` means the user cancelled; `Some("")` is an explicit empty answer,
/// which the credential store treats as "clear".
#[async_trait::async_trait]
pub trait CredentialPrompt: Send + Sync {
    async fn request_credential(&self) -> Option<String>;
}

/// Prompt that never asks and always reports a cancel.  Used when the token
/// is delivered out of band (e.g. `set_credential` host events).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

#[async_trait::async_trait]
impl CredentialPrompt for NoPrompt {
    async fn request_credential(&self) -> Option<String> {
        None
    }
}

const PROMPT_TEXT: &str = "GitHub personal access token required for API access (needs repo scope).\n\
It will be stored locally.  Token: ";

/// Reads one line from the terminal.  End of input counts as a cancel.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

#[async_trait::async_trait]
impl CredentialPrompt for TerminalPrompt {
    async fn request_credential(&self) -> Option<String> {
        let answer = tokio::task::spawn_blocking(|| {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{PROMPT_TEXT}");
            let _ = stderr.flush();

            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(0) => None,
                Ok(_) => Some(line),
                Err(e) => {
                    warn!(error = %e, "failed to read credential from terminal");
                    None
                }
            }
        })
        .await;

        answer.unwrap_or_else(|e| {
            warn!(error = %e, "credential prompt task failed");
            None
        })
    }
}
