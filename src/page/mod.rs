//! Page binding.
//!
//! The host page reaches this crate only as [`PageSnapshot`] values carried
//! by [`HostEvent`]s.  [`detect_repository`] decides whether a snapshot shows
//! a repository landing page; [`EngineSession`] follows navigation and drives
//! the engine and the display.

pub mod session;

pub use session::EngineSession;

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::forge::RepoIdentity;

/// What the host reports about the current page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PageSnapshot {
    /// Location path, e.g. `/owner/name/tree/main`.
    pub path: String,
    /// The structural element confirming a repository view is present.
    #[serde(default)]
    pub repo_marker: bool,
    /// The element the display is anchored next to is present.
    #[serde(default)]
    pub landmark: bool,
}

/// Event delivered by the host, one JSON object per line in `watch` mode.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// The page changed; carries the new state.
    Page(PageSnapshot),
    /// The user entered a token through the host's menu.
    SetCredential { token: String },
}

/// Top-level path segments that belong to the site, never to an owner.
const RESERVED_NAMESPACES: &[&str] = &[
    "settings",
    "notifications",
    "marketplace",
    "explore",
    "topics",
    "sponsors",
    "dashboard",
    "new",
    "codespaces",
    "account",
    "orgs",
    "login",
    "logout",
    "search",
    "features",
    "pulls",
    "issues",
    "organizations",
];

static REPO_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/([^/]+)/([^/]+)(?:/?$|/tree/|/find/|/graphs/|/network/|/releases/)").unwrap()
});

/// Repository shown by `snapshot`, if it is a repository landing page.
pub fn detect_repository(snapshot: &PageSnapshot) -> Option<RepoIdentity> {
    if !snapshot.repo_marker {
        return None;
    }

    let captures = REPO_PATH.captures(&snapshot.path)?;
    let owner = captures.get(1)?.as_str();
    let name = captures.get(2)?.as_str();

    if RESERVED_NAMESPACES.contains(&owner) {
        return None;
    }
    Some(RepoIdentity::new(owner, name))
}
