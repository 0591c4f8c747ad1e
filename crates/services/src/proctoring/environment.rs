use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Document-level listener groups a session can install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerKind {
    Keyboard,
    ContextMenu,
    Visibility,
    Fullscreen,
    Clipboard,
    Resize,
}

impl ListenerKind {
    /// DOM event names covered by this listener group.
    #[must_use]
    pub fn event_names(self) -> &'static [&'static str] {
        match self {
            Self::Keyboard => &["keydown"],
            Self::ContextMenu => &["contextmenu"],
            Self::Visibility => &["visibilitychange", "blur"],
            Self::Fullscreen => &["fullscreenchange"],
            Self::Clipboard => &["copy", "cut", "paste"],
            Self::Resize => &["resize"],
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EnvironmentError {
    #[error("fullscreen is not supported")]
    Unsupported,
    #[error("fullscreen request denied: {0}")]
    Denied(String),
    #[error("{0}")]
    Other(String),
}

/// The browser surface a proctoring session drives.
///
/// A session owns the listener set and the fullscreen state for as long as it
/// is active.
#[async_trait]
pub trait BrowserEnvironment: Send + Sync {
    /// Ask the browser to enter fullscreen.
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentError` when fullscreen is unsupported or refused.
    async fn request_fullscreen(&self) -> Result<(), EnvironmentError>;

    /// Leave fullscreen.
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentError` if the browser refuses.
    async fn exit_fullscreen(&self) -> Result<(), EnvironmentError>;

    fn is_fullscreen(&self) -> bool;

    fn add_listener(&self, kind: ListenerKind);

    fn remove_listener(&self, kind: ListenerKind);
}

/// What a `HeadlessEnvironment` answers to fullscreen requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FullscreenSupport {
    #[default]
    Granted,
    Denied,
    Unsupported,
}

#[derive(Debug, Default)]
struct HeadlessState {
    support: FullscreenSupport,
    fullscreen: bool,
    fail_exit: bool,
    fullscreen_requests: usize,
    listeners: BTreeMap<ListenerKind, usize>,
}

/// Browser stand-in with no real document, for replays and tests.
///
/// Tracks how many times each listener group is registered so leaks and
/// duplicate registrations are observable.
#[derive(Debug, Default)]
pub struct HeadlessEnvironment {
    state: Mutex<HeadlessState>,
}

impl HeadlessEnvironment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_support(support: FullscreenSupport) -> Self {
        let env = Self::default();
        env.set_support(support);
        env
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_support(&self, support: FullscreenSupport) {
        self.state().support = support;
    }

    /// Make the next `exit_fullscreen` calls fail.
    pub fn set_exit_failure(&self, fail: bool) {
        self.state().fail_exit = fail;
    }

    /// Simulates the participant pressing Escape.
    pub fn leave_fullscreen(&self) {
        self.state().fullscreen = false;
    }

    #[must_use]
    pub fn fullscreen_requests(&self) -> usize {
        self.state().fullscreen_requests
    }

    #[must_use]
    pub fn listener_count(&self, kind: ListenerKind) -> usize {
        self.state().listeners.get(&kind).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_listeners(&self) -> usize {
        self.state().listeners.values().sum()
    }
}

#[async_trait]
impl BrowserEnvironment for HeadlessEnvironment {
    async fn request_fullscreen(&self) -> Result<(), EnvironmentError> {
        let mut state = self.state();
        state.fullscreen_requests += 1;
        match state.support {
            FullscreenSupport::Granted => {
                state.fullscreen = true;
                Ok(())
            }
            FullscreenSupport::Denied => {
                Err(EnvironmentError::Denied("permission check failed".into()))
            }
            FullscreenSupport::Unsupported => Err(EnvironmentError::Unsupported),
        }
    }

    async fn exit_fullscreen(&self) -> Result<(), EnvironmentError> {
        let mut state = self.state();
        if state.fail_exit {
            return Err(EnvironmentError::Other("document not active".into()));
        }
        state.fullscreen = false;
        Ok(())
    }

    fn is_fullscreen(&self) -> bool {
        self.state().fullscreen
    }

    fn add_listener(&self, kind: ListenerKind) {
        *self.state().listeners.entry(kind).or_insert(0) += 1;
    }

    fn remove_listener(&self, kind: ListenerKind) {
        let mut state = self.state();
        if let Some(count) = state.listeners.get_mut(&kind) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.listeners.remove(&kind);
            }
        }
    }
}
