use serde::{Deserialize, Serialize};

use super::environment::ListenerKind;

/// A key press as seen by the document `keydown` listener.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyPress {
    pub key: String,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
}

impl KeyPress {
    #[must_use]
    pub fn plain(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn ctrl(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ctrl: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn ctrl_shift(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ctrl: true,
            shift: true,
            ..Self::default()
        }
    }

    /// Ctrl on most platforms, Cmd on macOS.
    #[must_use]
    pub fn command(&self) -> bool {
        self.ctrl || self.meta
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipboardAction {
    Copy,
    Cut,
    Paste,
}

/// Raw browser event delivered to a proctoring session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserSignal {
    KeyDown(KeyPress),
    ContextMenu,
    VisibilityChange {
        hidden: bool,
    },
    FullscreenChange {
        active: bool,
    },
    Clipboard {
        action: ClipboardAction,
    },
    Resize {
        outer_width: u32,
        inner_width: u32,
        outer_height: u32,
        inner_height: u32,
    },
}

impl BrowserSignal {
    /// Listener group that delivers this signal.
    #[must_use]
    pub fn listener(&self) -> ListenerKind {
        match self {
            Self::KeyDown(_) => ListenerKind::Keyboard,
            Self::ContextMenu => ListenerKind::ContextMenu,
            Self::VisibilityChange { .. } => ListenerKind::Visibility,
            Self::FullscreenChange { .. } => ListenerKind::Fullscreen,
            Self::Clipboard { .. } => ListenerKind::Clipboard,
            Self::Resize { .. } => ListenerKind::Resize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_deserialize_from_replay_json() {
        let signals: Vec<BrowserSignal> = serde_json::from_str(
            r#"[
                {"type": "key_down", "key": "I", "ctrl": true, "shift": true},
                {"type": "visibility_change", "hidden": true},
                {"type": "clipboard", "action": "paste"},
                {"type": "context_menu"}
            ]"#,
        )
        .unwrap();

        assert_eq!(signals[0], BrowserSignal::KeyDown(KeyPress::ctrl_shift("I")));
        assert_eq!(signals[1].listener(), ListenerKind::Visibility);
        assert_eq!(
            signals[2],
            BrowserSignal::Clipboard {
                action: ClipboardAction::Paste
            }
        );
        assert_eq!(signals[3].listener(), ListenerKind::ContextMenu);
    }
}
