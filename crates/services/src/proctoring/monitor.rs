use proctor_core::model::{QuizConfig, ViolationKind};

use super::environment::{BrowserEnvironment, ListenerKind};
use super::signal::{BrowserSignal, KeyPress};

/// Result of classifying one browser signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    pub kind: Option<ViolationKind>,
    /// The host must cancel the event's native effect.
    pub prevent_default: bool,
}

impl Classification {
    fn ignored() -> Self {
        Self::default()
    }

    fn violation(kind: ViolationKind) -> Self {
        Self {
            kind: Some(kind),
            prevent_default: false,
        }
    }

    fn blocked(kind: ViolationKind) -> Self {
        Self {
            kind: Some(kind),
            prevent_default: true,
        }
    }
}

/// Installs the configured listeners and turns raw signals into violations.
///
/// Signals from a listener group that is not installed are ignored, so
/// classification stops the moment listeners are removed.
#[derive(Debug, Clone)]
pub struct ViolationMonitor {
    plan: Vec<ListenerKind>,
    installed: Vec<ListenerKind>,
    devtools_gap: Option<u32>,
    devtools_open: bool,
}

impl ViolationMonitor {
    #[must_use]
    pub fn from_config(config: &QuizConfig) -> Self {
        let mut plan = vec![ListenerKind::Keyboard, ListenerKind::ContextMenu];
        if config.enable_full_screen {
            plan.push(ListenerKind::Fullscreen);
        }
        if config.enable_tab_monitoring {
            plan.push(ListenerKind::Visibility);
            if config.devtools_gap_threshold.is_some() {
                plan.push(ListenerKind::Resize);
            }
        }
        if config.enable_copy_paste_block {
            plan.push(ListenerKind::Clipboard);
        }

        Self {
            plan,
            installed: Vec::new(),
            devtools_gap: config.devtools_gap_threshold,
            devtools_open: false,
        }
    }

    /// Listener groups this monitor installs, in installation order.
    #[must_use]
    pub fn plan(&self) -> &[ListenerKind] {
        &self.plan
    }

    #[must_use]
    pub fn installed(&self) -> &[ListenerKind] {
        &self.installed
    }

    #[must_use]
    pub fn is_installed(&self, kind: ListenerKind) -> bool {
        self.installed.contains(&kind)
    }

    /// Register every planned listener that is not registered yet.
    pub fn install(&mut self, env: &dyn BrowserEnvironment) {
        for kind in &self.plan {
            if !self.installed.contains(kind) {
                env.add_listener(*kind);
                self.installed.push(*kind);
            }
        }
    }

    /// Unregister listeners in reverse installation order.
    ///
    /// Returns how many listeners were removed.
    pub fn remove(&mut self, env: &dyn BrowserEnvironment) -> usize {
        let mut removed = 0;
        while let Some(kind) = self.installed.pop() {
            env.remove_listener(kind);
            removed += 1;
        }
        self.devtools_open = false;
        removed
    }

    /// Classify a signal into a violation, if it is one.
    pub fn classify(&mut self, signal: &BrowserSignal) -> Classification {
        if !self.is_installed(signal.listener()) {
            return Classification::ignored();
        }

        match signal {
            BrowserSignal::KeyDown(key) => classify_key(key)
                .map_or_else(Classification::ignored, Classification::blocked),
            BrowserSignal::ContextMenu => Classification::blocked(ViolationKind::ContextMenu),
            BrowserSignal::VisibilityChange { hidden: true } => {
                Classification::violation(ViolationKind::TabHidden)
            }
            BrowserSignal::FullscreenChange { active: false } => {
                Classification::violation(ViolationKind::FullscreenExited)
            }
            BrowserSignal::Clipboard { .. } => {
                Classification::blocked(ViolationKind::ClipboardAttempt)
            }
            BrowserSignal::Resize {
                outer_width,
                inner_width,
                outer_height,
                inner_height,
            } => {
                let Some(threshold) = self.devtools_gap else {
                    return Classification::ignored();
                };
                let gap = outer_width
                    .saturating_sub(*inner_width)
                    .max(outer_height.saturating_sub(*inner_height));
                let open = gap > threshold;
                // Count the closed -> open edge only.
                let opened = open && !self.devtools_open;
                self.devtools_open = open;
                if opened {
                    Classification::violation(ViolationKind::DevtoolsOpened)
                } else {
                    Classification::ignored()
                }
            }
            BrowserSignal::VisibilityChange { hidden: false }
            | BrowserSignal::FullscreenChange { active: true } => Classification::ignored(),
        }
    }
}

fn classify_key(key: &KeyPress) -> Option<ViolationKind> {
    let name = key.key.to_ascii_lowercase();
    if name == "f12" {
        return Some(ViolationKind::DevtoolsShortcut);
    }

    let inspector_letter = matches!(name.as_str(), "i" | "j" | "c");
    // Ctrl+Shift+I/J/C, Cmd+Option+I/J/C on macOS.
    if inspector_letter && ((key.command() && key.shift) || (key.meta && key.alt)) {
        return Some(ViolationKind::DevtoolsShortcut);
    }

    if name == "u" && key.command() && !key.shift {
        return Some(ViolationKind::ViewSource);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proctoring::environment::HeadlessEnvironment;
    use crate::proctoring::signal::ClipboardAction;

    fn monitor(config: &QuizConfig) -> (ViolationMonitor, HeadlessEnvironment) {
        let env = HeadlessEnvironment::new();
        let mut monitor = ViolationMonitor::from_config(config);
        monitor.install(&env);
        (monitor, env)
    }

    #[test]
    fn devtools_and_view_source_shortcuts_are_blocked() {
        let (mut monitor, _env) = monitor(&QuizConfig::unmonitored(3));

        let cases = [
            (KeyPress::plain("F12"), Some(ViolationKind::DevtoolsShortcut)),
            (KeyPress::ctrl_shift("I"), Some(ViolationKind::DevtoolsShortcut)),
            (KeyPress::ctrl_shift("j"), Some(ViolationKind::DevtoolsShortcut)),
            (
                KeyPress {
                    key: "c".into(),
                    meta: true,
                    alt: true,
                    ..KeyPress::default()
                },
                Some(ViolationKind::DevtoolsShortcut),
            ),
            (KeyPress::ctrl("u"), Some(ViolationKind::ViewSource)),
            (KeyPress::ctrl("c"), None),
            (KeyPress::plain("i"), None),
        ];

        for (key, expected) in cases {
            let classification = monitor.classify(&BrowserSignal::KeyDown(key.clone()));
            assert_eq!(classification.kind, expected, "key {key:?}");
            assert_eq!(classification.prevent_default, expected.is_some());
        }
    }

    #[test]
    fn disabled_listeners_do_not_classify() {
        let (mut monitor, env) = monitor(&QuizConfig::unmonitored(3));
        assert_eq!(env.listener_count(ListenerKind::Visibility), 0);

        let hidden = monitor.classify(&BrowserSignal::VisibilityChange { hidden: true });
        assert_eq!(hidden.kind, None);
        let paste = monitor.classify(&BrowserSignal::Clipboard {
            action: ClipboardAction::Paste,
        });
        assert_eq!(paste, Classification::ignored());
    }

    #[test]
    fn install_is_idempotent_and_remove_clears_everything() {
        let config = QuizConfig::default();
        let env = HeadlessEnvironment::new();
        let mut monitor = ViolationMonitor::from_config(&config);

        for _ in 0..2 {
            monitor.install(&env);
            monitor.install(&env);
            assert_eq!(env.total_listeners(), monitor.plan().len());
            assert_eq!(monitor.remove(&env), monitor.plan().len());
            assert_eq!(env.total_listeners(), 0);
        }
        assert_eq!(monitor.remove(&env), 0);
        assert_eq!(
            monitor.classify(&BrowserSignal::ContextMenu),
            Classification::ignored()
        );
    }

    #[test]
    fn resize_counts_only_when_devtools_dock_opens() {
        let config = QuizConfig {
            devtools_gap_threshold: Some(160),
            ..QuizConfig::default()
        };
        let (mut monitor, env) = monitor(&config);
        assert_eq!(env.listener_count(ListenerKind::Resize), 1);

        let docked = BrowserSignal::Resize {
            outer_width: 1400,
            inner_width: 1000,
            outer_height: 900,
            inner_height: 880,
        };
        let closed = BrowserSignal::Resize {
            outer_width: 1400,
            inner_width: 1400,
            outer_height: 900,
            inner_height: 880,
        };

        assert_eq!(
            monitor.classify(&docked).kind,
            Some(ViolationKind::DevtoolsOpened)
        );
        assert_eq!(monitor.classify(&docked).kind, None);
        assert_eq!(monitor.classify(&closed).kind, None);
        assert_eq!(
            monitor.classify(&docked).kind,
            Some(ViolationKind::DevtoolsOpened)
        );
    }

    #[test]
    fn fullscreen_exit_is_a_violation_but_entry_is_not() {
        let (mut monitor, _env) = monitor(&QuizConfig::default());
        assert_eq!(
            monitor
                .classify(&BrowserSignal::FullscreenChange { active: false })
                .kind,
            Some(ViolationKind::FullscreenExited)
        );
        assert_eq!(
            monitor
                .classify(&BrowserSignal::FullscreenChange { active: true })
                .kind,
            None
        );
    }
}
