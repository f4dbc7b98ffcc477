//! Per-page session state.
//!
//! An [`EngineSession`] tracks the repository currently shown, starts one
//! engine invocation per navigation and renders its states.  Every
//! invocation carries a generation number; a render is applied only while
//! that generation is still the tracked one, so a slow invocation for a page
//! the user already left can never overwrite the newer page's display.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{detect_repository, HostEvent, PageSnapshot};
use crate::credentials::CredentialPrompt;
use crate::display::DisplaySlot;
use crate::engine::{Engine, SizeState};
use crate::forge::RepoIdentity;

#[derive(Debug, Clone)]
struct Tracked {
    identity: RepoIdentity,
    path: String,
    generation: u64,
}

struct Inner {
    engine: Arc<Engine>,
    display: DisplaySlot,
    prompt: Arc<dyn CredentialPrompt>,
    max_credential_prompts: u32,
    tracked: Mutex<Option<Tracked>>,
    generation: AtomicU64,
    last_state: Mutex<SizeState>,
}

/// Explicit per-page state.  Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct EngineSession {
    inner: Arc<Inner>,
}

impl EngineSession {
    pub fn new(
        engine: Arc<Engine>,
        display: DisplaySlot,
        prompt: Arc<dyn CredentialPrompt>,
        max_credential_prompts: u32,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                display,
                prompt,
                max_credential_prompts,
                tracked: Mutex::new(None),
                generation: AtomicU64::new(0),
                last_state: Mutex::new(SizeState::Idle),
            }),
        }
    }

    /// Key of the repository currently tracked.
    pub fn tracked_key(&self) -> Option<String> {
        self.tracked().as_ref().map(|t| t.identity.key())
    }

    /// Most recent state rendered for the tracked repository.
    pub fn last_state(&self) -> SizeState {
        lock(&self.inner.last_state).clone()
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    /// Start resolving the repository shown by `snapshot`.
    ///
    /// Returns `None` when the page is not a repository or when it is the
    /// exact page already tracked.  A duplicate whose display element went
    /// missing gets the last state redrawn instead of a new invocation.
    pub fn navigate(&self, snapshot: &PageSnapshot) -> Option<JoinHandle<()>> {
        let display = &self.inner.display;
        display.set_landmark(snapshot.landmark);

        let Some(identity) = detect_repository(snapshot) else {
            debug!(path = %snapshot.path, "not a repository page");
            return None;
        };

        let duplicate = self
            .tracked()
            .as_ref()
            .is_some_and(|t| t.identity == identity && t.path == snapshot.path);
        if duplicate {
            if !display.is_attached() {
                debug!(repo = %identity, "display missing on tracked page, redrawing");
                display.render(&self.last_state());
            }
            return None;
        }

        Some(self.start(identity, snapshot.path.clone()))
    }

    /// Subscription callback for structural page changes.
    pub fn handle_change(&self, snapshot: &PageSnapshot) -> Option<JoinHandle<()>> {
        let identity = detect_repository(snapshot);
        self.inner.display.set_landmark(snapshot.landmark);

        if snapshot.landmark && !self.inner.display.is_attached() && identity.is_some() {
            debug!("landmark present without display element");
            return self.navigate(snapshot);
        }

        let tracked_key = self.tracked_key();
        match identity {
            Some(identity) if tracked_key.as_deref() != Some(identity.key().as_str()) => {
                info!(repo = %identity, "navigated to another repository");
                self.navigate(snapshot)
            }
            None if tracked_key.is_some() => {
                info!(path = %snapshot.path, "navigated away from repository");
                self.teardown();
                None
            }
            _ => None,
        }
    }

    /// Remove the display element and forget the tracked repository.  Any
    /// invocation still in flight is superseded.
    pub fn teardown(&self) {
        *self.tracked() = None;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.display.remove();
        *lock(&self.inner.last_state) = SizeState::Idle;
    }

    /// Token entered by the user.  An accepted token re-evaluates the tracked
    /// repository even though its page did not change.
    pub fn set_credential(&self, raw: &str) -> Result<Option<JoinHandle<()>>> {
        let accepted = self.inner.engine.credentials().set(raw)?;

        let Some(tracked) = self.tracked().clone() else {
            return Ok(None);
        };
        if !accepted {
            let rejected = SizeState::CredentialRequired { invalid: true };
            self.render_if_current(tracked.generation, &rejected);
            return Ok(None);
        }

        info!(repo = %tracked.identity, "credential updated, re-evaluating");
        Ok(Some(self.start(tracked.identity, tracked.path)))
    }

    /// Consume host events until the channel closes.  Page snapshots queued
    /// behind each other are coalesced to the newest one.  Waits for every
    /// started invocation before returning.
    pub async fn run(&self, mut events: mpsc::Receiver<HostEvent>) {
        let mut pending = Vec::new();

        while let Some(first) = events.recv().await {
            reap(&mut pending).await;

            let mut batch = vec![first];
            while let Ok(next) = events.try_recv() {
                batch.push(next);
            }

            for event in coalesce(batch) {
                if let Some(handle) = self.dispatch(event) {
                    pending.push(handle);
                }
            }
        }

        for handle in pending {
            join(handle).await;
        }
    }

    fn dispatch(&self, event: HostEvent) -> Option<JoinHandle<()>> {
        match event {
            HostEvent::Page(snapshot) => self.handle_change(&snapshot),
            HostEvent::SetCredential { token } => match self.set_credential(&token) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(error = %e, "failed to store credential");
                    None
                }
            },
        }
    }

    // -----------------------------------------------------------------------
    // Invocations
    // -----------------------------------------------------------------------

    fn start(&self, identity: RepoIdentity, path: String) -> JoinHandle<()> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.tracked() = Some(Tracked {
            identity: identity.clone(),
            path,
            generation,
        });
        info!(repo = %identity, generation, "tracking repository");
        self.render_if_current(generation, &SizeState::Loading);

        let session = self.clone();
        tokio::spawn(async move { session.invoke(identity, generation).await })
    }

    async fn invoke(&self, identity: RepoIdentity, generation: u64) {
        let emit = |state: SizeState| {
            self.render_if_current(generation, &state);
        };
        let mut prompts = 0;

        loop {
            let state = self.inner.engine.resolve(&identity, &emit).await;
            debug_assert!(state.is_terminal());
            if !self.render_if_current(generation, &state) {
                return;
            }
            if !matches!(state, SizeState::CredentialRequired { .. }) {
                return;
            }

            // Ask until a token is accepted, the user cancels or the
            // prompt budget runs out.
            loop {
                if prompts >= self.inner.max_credential_prompts {
                    info!(prompts, "credential prompt limit reached");
                    return;
                }
                prompts += 1;

                let Some(answer) = self.inner.prompt.request_credential().await else {
                    debug!("credential prompt cancelled");
                    return;
                };
                if !self.is_current(generation) {
                    return;
                }
                match self.inner.engine.credentials().set(&answer) {
                    Ok(true) => break,
                    Ok(false) => {
                        self.render_if_current(
                            generation,
                            &SizeState::CredentialRequired { invalid: true },
                        );
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to store credential");
                        return;
                    }
                }
            }

            self.render_if_current(generation, &SizeState::Loading);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.tracked()
            .as_ref()
            .is_some_and(|t| t.generation == generation)
    }

    /// Render `state` if `generation` is still tracked.  The check and the
    /// render happen under the tracking lock.
    fn render_if_current(&self, generation: u64, state: &SizeState) -> bool {
        let tracked = self.tracked();
        if !tracked.as_ref().is_some_and(|t| t.generation == generation) {
            debug!(generation, ?state, "superseded, render dropped");
            return false;
        }
        self.inner.display.render(state);
        *lock(&self.inner.last_state) = state.clone();
        true
    }

    fn tracked(&self) -> MutexGuard<'_, Option<Tracked>> {
        lock(&self.inner.tracked)
    }
}

/// Collect the invocations that already finished, keeping the rest.
async fn reap(pending: &mut Vec<JoinHandle<()>>) {
    let (done, running): (Vec<_>, Vec<_>) =
        pending.drain(..).partition(|handle| handle.is_finished());
    *pending = running;
    for handle in done {
        join(handle).await;
    }
}

async fn join(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        warn!(error = %e, "engine invocation task failed");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drop page snapshots that are immediately followed by another one.
fn coalesce(batch: Vec<HostEvent>) -> Vec<HostEvent> {
    let mut out: Vec<HostEvent> = Vec::with_capacity(batch.len());
    for event in batch {
        if matches!(event, HostEvent::Page(_)) && matches!(out.last(), Some(HostEvent::Page(_))) {
            out.pop();
        }
        out.push(event);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::cache::SizeCache;
    use crate::credentials::{CredentialStore, NoPrompt};
    use crate::display::{RecordingRenderer, RenderEvent};
    use crate::engine::SystemClock;
    use crate::metrics::MetricsRegistry;
    use crate::storage::MemoryStore;
    use crate::testing::{tree, ScriptedRemote};

    struct ScriptedPrompt(Mutex<VecDeque<Option<String>>>);

    impl ScriptedPrompt {
        fn new(answers: &[Option<&str>]) -> Self {
            Self(Mutex::new(
                answers.iter().map(|a| a.map(str::to_string)).collect(),
            ))
        }
    }

    #[async_trait::async_trait]
    impl CredentialPrompt for ScriptedPrompt {
        async fn request_credential(&self) -> Option<String> {
            self.0.lock().unwrap().pop_front().flatten()
        }
    }

    struct Harness {
        remote: Arc<ScriptedRemote>,
        renderer: Arc<RecordingRenderer>,
        credentials: CredentialStore,
        session: EngineSession,
    }

    fn harness_with(prompt: Arc<dyn CredentialPrompt>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(ScriptedRemote::new());
        let credentials = CredentialStore::new(store.clone());
        credentials.set("ghp_test").unwrap();

        let engine = Engine::new(
            remote.clone(),
            credentials.clone(),
            SizeCache::new(store),
            Arc::new(SystemClock),
            chrono::Duration::hours(24),
            MetricsRegistry::new().metrics,
        );
        let renderer = Arc::new(RecordingRenderer::default());
        let session = EngineSession::new(
            Arc::new(engine),
            DisplaySlot::new(renderer.clone()),
            prompt,
            3,
        );
        Harness {
            remote,
            renderer,
            credentials,
            session,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(NoPrompt))
    }

    fn page(path: &str) -> PageSnapshot {
        PageSnapshot {
            path: path.to_string(),
            repo_marker: true,
            landmark: true,
        }
    }

    fn shown(renderer: &RecordingRenderer) -> Vec<String> {
        renderer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                RenderEvent::Show(text, _) => Some(text),
                _ => None,
            })
            .collect()
    }

    // ── navigation ──

    #[tokio::test]
    async fn navigate_renders_loading_then_size() {
        let h = harness();
        h.remote
            .push_head("acme/widgets", Ok("sha1"))
            .push_tree("acme/widgets", Ok(tree(2048, false)));

        h.session.navigate(&page("/acme/widgets")).unwrap().await.unwrap();

        assert_eq!(shown(&h.renderer), vec!["(loading...)", "2 KB"]);
        assert_eq!(h.session.tracked_key().as_deref(), Some("acme/widgets"));
    }

    #[tokio::test]
    async fn newer_navigation_wins_over_slower_one() {
        let h = harness();
        let gate_a = h.remote.gate("acme/a");
        h.remote
            .push_head("acme/a", Ok("sha-a"))
            .push_tree("acme/a", Ok(tree(1024, false)));
        h.remote
            .push_head("acme/b", Ok("sha-b"))
            .push_tree("acme/b", Ok(tree(3 * 1024 * 1024, false)));

        let a = h.session.navigate(&page("/acme/a")).unwrap();
        tokio::task::yield_now().await;
        let b = h.session.navigate(&page("/acme/b")).unwrap();
        b.await.unwrap();

        gate_a.notify_one();
        a.await.unwrap();

        let texts = shown(&h.renderer);
        assert_eq!(texts.last().map(String::as_str), Some("3 MB"));
        assert!(!texts.iter().any(|t| t == "1 KB"), "stale size rendered: {texts:?}");
        assert_eq!(
            h.session.last_state(),
            SizeState::Displaying {
                size_bytes: 3 * 1024 * 1024,
                approximate: false,
            }
        );
    }

    #[tokio::test]
    async fn same_page_is_not_processed_twice() {
        let h = harness();
        h.remote
            .push_head("acme/widgets", Ok("sha1"))
            .push_tree("acme/widgets", Ok(tree(10, false)));

        h.session.navigate(&page("/acme/widgets")).unwrap().await.unwrap();
        assert!(h.session.navigate(&page("/acme/widgets")).is_none());
        assert_eq!(h.remote.head_calls(), 1);
    }

    #[tokio::test]
    async fn other_path_in_same_repository_is_processed_again() {
        let h = harness();
        h.remote
            .push_head("acme/widgets", Ok("sha1"))
            .push_tree("acme/widgets", Ok(tree(10, false)));

        h.session.navigate(&page("/acme/widgets")).unwrap().await.unwrap();
        // Cached now, so no remote calls are needed the second time.
        h.session
            .navigate(&page("/acme/widgets/tree/main"))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(h.remote.total_calls(), 2);
        assert_eq!(shown(&h.renderer).last().map(String::as_str), Some("10 Bytes"));
    }

    #[tokio::test]
    async fn non_repository_page_is_ignored() {
        let h = harness();
        assert!(h.session.navigate(&page("/settings/profile")).is_none());
        assert!(h.renderer.events().is_empty());
        assert_eq!(h.session.tracked_key(), None);
    }

    // ── structural changes ──

    #[tokio::test]
    async fn leaving_repository_tears_down() {
        let h = harness();
        h.remote
            .push_head("acme/widgets", Ok("sha1"))
            .push_tree("acme/widgets", Ok(tree(10, false)));
        h.session.handle_change(&page("/acme/widgets")).unwrap().await.unwrap();

        let away = PageSnapshot {
            path: "/notifications".to_string(),
            repo_marker: false,
            landmark: false,
        };
        assert!(h.session.handle_change(&away).is_none());

        assert_eq!(h.session.tracked_key(), None);
        assert_eq!(h.session.last_state(), SizeState::Idle);
        assert_eq!(h.renderer.events().last(), Some(&RenderEvent::Detach));
    }

    #[tokio::test]
    async fn same_repository_change_does_not_renavigate() {
        let h = harness();
        h.remote
            .push_head("acme/widgets", Ok("sha1"))
            .push_tree("acme/widgets", Ok(tree(10, false)));
        h.session.handle_change(&page("/acme/widgets")).unwrap().await.unwrap();

        assert!(h.session.handle_change(&page("/acme/widgets/tree/dev")).is_none());
        assert_eq!(h.remote.total_calls(), 2);
    }

    #[tokio::test]
    async fn reappearing_landmark_redraws_last_state() {
        let h = harness();
        h.remote
            .push_head("acme/widgets", Ok("sha1"))
            .push_tree("acme/widgets", Ok(tree(10, false)));
        h.session.handle_change(&page("/acme/widgets")).unwrap().await.unwrap();

        let mut gone = page("/acme/widgets");
        gone.landmark = false;
        assert!(h.session.handle_change(&gone).is_none());

        assert!(h.session.handle_change(&page("/acme/widgets")).is_none());
        assert_eq!(
            h.renderer.events().last(),
            Some(&RenderEvent::Show("10 Bytes".to_string(), crate::display::Style::Size))
        );
        assert_eq!(h.remote.total_calls(), 2);
    }

    // ── credentials ──

    #[tokio::test]
    async fn missing_credential_shows_pat_required() {
        let h = harness();
        h.credentials.clear().unwrap();

        h.session.navigate(&page("/acme/widgets")).unwrap().await.unwrap();

        assert_eq!(h.renderer.last_text().as_deref(), Some("PAT Required"));
        assert_eq!(h.remote.total_calls(), 0);
    }

    #[tokio::test]
    async fn prompted_credential_re_evaluates() {
        let h = harness_with(Arc::new(ScriptedPrompt::new(&[Some("  ghp_new  ")])));
        h.credentials.clear().unwrap();
        h.remote
            .push_head("acme/widgets", Ok("sha1"))
            .push_tree("acme/widgets", Ok(tree(1536, true)));

        h.session.navigate(&page("/acme/widgets")).unwrap().await.unwrap();

        assert_eq!(
            shown(&h.renderer),
            vec!["(loading...)", "PAT Required", "(loading...)", "~1.5 KB"]
        );
        assert!(h.credentials.get().is_some());
    }

    #[tokio::test]
    async fn prompting_stops_after_limit() {
        let prompt = Arc::new(ScriptedPrompt::new(&[
            Some(""),
            Some(" "),
            Some(""),
            Some("ghp_late"),
        ]));
        let h = harness_with(prompt.clone());
        h.credentials.clear().unwrap();

        h.session.navigate(&page("/acme/widgets")).unwrap().await.unwrap();

        assert_eq!(h.renderer.last_text().as_deref(), Some("Invalid PAT"));
        assert!(h.credentials.get().is_none());
        assert_eq!(prompt.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_token_from_api_clears_and_shows_invalid() {
        let h = harness();
        h.remote
            .push_head("acme/widgets", Err(crate::forge::ApiError::InvalidCredential));

        h.session.navigate(&page("/acme/widgets")).unwrap().await.unwrap();

        assert_eq!(h.renderer.last_text().as_deref(), Some("Invalid PAT"));
        assert!(h.credentials.get().is_none());
    }

    #[tokio::test]
    async fn set_credential_re_evaluates_tracked_repository() {
        let h = harness();
        h.credentials.clear().unwrap();
        h.session.navigate(&page("/acme/widgets")).unwrap().await.unwrap();
        assert_eq!(h.renderer.last_text().as_deref(), Some("PAT Required"));

        h.remote
            .push_head("acme/widgets", Ok("sha1"))
            .push_tree("acme/widgets", Ok(tree(512, false)));
        let handle = h.session.set_credential("ghp_fresh").unwrap().unwrap();
        handle.await.unwrap();

        assert_eq!(h.renderer.last_text().as_deref(), Some("512 Bytes"));
    }

    #[tokio::test]
    async fn empty_set_credential_shows_invalid() {
        let h = harness();
        h.credentials.clear().unwrap();
        h.session.navigate(&page("/acme/widgets")).unwrap().await.unwrap();

        assert!(h.session.set_credential("   ").unwrap().is_none());
        assert_eq!(h.renderer.last_text().as_deref(), Some("Invalid PAT"));
    }

    // ── event loop ──

    #[test]
    fn consecutive_snapshots_coalesce() {
        let a = HostEvent::Page(page("/acme/a"));
        let b = HostEvent::Page(page("/acme/b"));
        let c = HostEvent::Page(page("/acme/c"));
        let token = HostEvent::SetCredential {
            token: "ghp_x".to_string(),
        };

        let out = coalesce(vec![a, b.clone(), token.clone(), c.clone()]);
        assert_eq!(out, vec![b, token, c]);
    }

    #[tokio::test]
    async fn finished_invocations_are_released() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let done = tokio::spawn(async {});
        let waiting = tokio::spawn({
            let gate = gate.clone();
            async move { gate.notified().await }
        });
        let mut pending = vec![done, waiting];
        tokio::task::yield_now().await;
        while !pending[0].is_finished() {
            tokio::task::yield_now().await;
        }

        reap(&mut pending).await;
        assert_eq!(pending.len(), 1);

        gate.notify_one();
        for handle in pending {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn run_processes_events_until_closed() {
        let h = harness();
        h.credentials.clear().unwrap();
        // The superseded invocation may also reach the remote once the
        // token is in place, so script both.
        for _ in 0..2 {
            h.remote
                .push_head("acme/b", Ok("sha-b"))
                .push_tree("acme/b", Ok(tree(100, false)));
        }

        let (tx, rx) = mpsc::channel(8);
        tx.send(HostEvent::Page(page("/acme/a"))).await.unwrap();
        tx.send(HostEvent::Page(page("/acme/b"))).await.unwrap();
        tx.send(HostEvent::SetCredential {
            token: "ghp_x".to_string(),
        })
        .await
        .unwrap();
        drop(tx);

        h.session.run(rx).await;

        assert_eq!(h.session.tracked_key().as_deref(), Some("acme/b"));
        assert_eq!(h.renderer.last_text().as_deref(), Some("100 Bytes"));
        assert_eq!(h.remote.head_calls(), h.remote.tree_calls());
    }
}
