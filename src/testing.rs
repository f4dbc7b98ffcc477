//! Fakes shared by the engine and session tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::forge::{ApiError, RemoteClient, RepoIdentity, TreeSize};

/// [`RemoteClient`] answering from per-repository scripts.  An exhausted
/// script answers with a network error so unexpected calls show up in
/// assertions.
#[derive(Default)]
pub struct ScriptedRemote {
    heads: Mutex<Vec<(String, VecDeque<Result<String, ApiError>>)>>,
    trees: Mutex<Vec<(String, VecDeque<Result<TreeSize, ApiError>>)>>,
    gates: Mutex<Vec<(String, Arc<Notify>)>>,
    head_calls: AtomicUsize,
    tree_calls: AtomicUsize,
    tree_shas: Mutex<Vec<String>>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_head(&self, repo: &str, answer: Result<&str, ApiError>) -> &Self {
        push(&self.heads, repo, answer.map(str::to_string));
        self
    }

    pub fn push_tree(&self, repo: &str, answer: Result<TreeSize, ApiError>) -> &Self {
        push(&self.trees, repo, answer);
        self
    }

    /// Hold head lookups for `repo` until the returned handle is notified.
    pub fn gate(&self, repo: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .push((repo.to_string(), notify.clone()));
        notify
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn tree_calls(&self) -> usize {
        self.tree_calls.load(Ordering::SeqCst)
    }

    /// Commit shas passed to `tree_size`, in call order.
    pub fn tree_shas(&self) -> Vec<String> {
        self.tree_shas.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.head_calls() + self.tree_calls()
    }
}

fn push<T>(scripts: &Mutex<Vec<(String, VecDeque<T>)>>, repo: &str, answer: T) {
    let mut scripts = scripts.lock().unwrap();
    match scripts.iter_mut().find(|(key, _)| key == repo) {
        Some((_, queue)) => queue.push_back(answer),
        None => scripts.push((repo.to_string(), VecDeque::from([answer]))),
    }
}

fn pop<T>(scripts: &Mutex<Vec<(String, VecDeque<T>)>>, repo: &str) -> Option<T> {
    let mut scripts = scripts.lock().unwrap();
    scripts
        .iter_mut()
        .find(|(key, _)| key == repo)
        .and_then(|(_, queue)| queue.pop_front())
}

#[async_trait::async_trait]
impl RemoteClient for ScriptedRemote {
    async fn default_branch_head_sha(&self, repo: &RepoIdentity) -> Result<String, ApiError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self
            .gates
            .lock()
            .unwrap()
            .iter()
            .find(|(key, _)| *key == repo.key())
            .map(|(_, notify)| notify.clone());
        if let Some(gate) = gate {
            gate.notified().await;
        }
        pop(&self.heads, &repo.key())
            .unwrap_or_else(|| Err(ApiError::Network(format!("unscripted head call for {repo}"))))
    }

    async fn tree_size(
        &self,
        repo: &RepoIdentity,
        commit_sha: &str,
    ) -> Result<TreeSize, ApiError> {
        self.tree_calls.fetch_add(1, Ordering::SeqCst);
        self.tree_shas.lock().unwrap().push(commit_sha.to_string());
        pop(&self.trees, &repo.key())
            .unwrap_or_else(|| Err(ApiError::Network(format!("unscripted tree call for {repo}"))))
    }
}

pub fn tree(size_bytes: u64, truncated: bool) -> TreeSize {
    TreeSize {
        size_bytes,
        truncated,
    }
}
