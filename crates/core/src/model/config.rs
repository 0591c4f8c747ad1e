use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("fullscreen retry attempts must be at most {max}")]
    TooManyRetryAttempts { max: u32 },

    #[error("fullscreen retry delay must be at most {max_ms} ms")]
    RetryDelayTooLong { max_ms: u64 },

    #[error("time limit must be > 0 seconds")]
    InvalidTimeLimit,

    #[error("devtools gap threshold must be > 0 pixels")]
    InvalidDevtoolsGap,
}

//
// ─── RETRY POLICY ──────────────────────────────────────────────────────────────
//

/// How the session tries to get back into fullscreen after the participant
/// leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub const MAX_ATTEMPTS: u32 = 10;
    pub const MAX_DELAY_MS: u64 = 10_000;

    #[must_use]
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// A policy that never re-requests fullscreen.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            attempts: 0,
            delay_ms: 0,
        }
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            delay_ms: 100,
        }
    }
}

//
// ─── QUIZ CONFIG ───────────────────────────────────────────────────────────────
//

/// Proctoring options attached to a quiz.
///
/// Field names match the quiz table columns of the hosted backend so a row
/// can be deserialized directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct QuizConfig {
    pub enable_full_screen: bool,
    pub enable_tab_monitoring: bool,
    pub enable_copy_paste_block: bool,
    /// Values `<= 0` breach on the first violation.
    pub max_cheat_attempts: i32,
    pub fullscreen_retry: RetryPolicy,
    /// Outer/inner window gap (pixels) that counts as docked developer tools.
    pub devtools_gap_threshold: Option<u32>,
    pub allow_retake: bool,
    pub time_limit_secs: Option<u64>,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            enable_full_screen: true,
            enable_tab_monitoring: true,
            enable_copy_paste_block: true,
            max_cheat_attempts: 3,
            fullscreen_retry: RetryPolicy::default(),
            devtools_gap_threshold: None,
            allow_retake: false,
            time_limit_secs: None,
        }
    }
}

impl QuizConfig {
    /// Configuration with every monitor switched off.
    #[must_use]
    pub fn unmonitored(max_cheat_attempts: i32) -> Self {
        Self {
            enable_full_screen: false,
            enable_tab_monitoring: false,
            enable_copy_paste_block: false,
            max_cheat_attempts,
            fullscreen_retry: RetryPolicy::disabled(),
            ..Self::default()
        }
    }

    /// Number of warnings that triggers a forced submission.
    ///
    /// Never below one, so zero or negative limits fire on the first
    /// violation.
    #[must_use]
    pub fn breach_limit(&self) -> u32 {
        u32::try_from(self.max_cheat_attempts.max(1)).unwrap_or(1)
    }

    #[must_use]
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs.map(Duration::from_secs)
    }

    /// Checks option ranges.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a retry policy, time limit or devtools gap
    /// is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fullscreen_retry.attempts > RetryPolicy::MAX_ATTEMPTS {
            return Err(ConfigError::TooManyRetryAttempts {
                max: RetryPolicy::MAX_ATTEMPTS,
            });
        }
        if self.fullscreen_retry.delay_ms > RetryPolicy::MAX_DELAY_MS {
            return Err(ConfigError::RetryDelayTooLong {
                max_ms: RetryPolicy::MAX_DELAY_MS,
            });
        }
        if self.time_limit_secs == Some(0) {
            return Err(ConfigError::InvalidTimeLimit);
        }
        if self.devtools_gap_threshold == Some(0) {
            return Err(ConfigError::InvalidDevtoolsGap);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breach_limit_clamps_non_positive_values() {
        assert_eq!(QuizConfig::unmonitored(0).breach_limit(), 1);
        assert_eq!(QuizConfig::unmonitored(-4).breach_limit(), 1);
        assert_eq!(QuizConfig::unmonitored(3).breach_limit(), 3);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: QuizConfig = serde_json::from_str(
            r#"{"enable_full_screen": false, "max_cheat_attempts": 5}"#,
        )
        .unwrap();
        assert!(!config.enable_full_screen);
        assert!(config.enable_tab_monitoring);
        assert_eq!(config.max_cheat_attempts, 5);
        assert_eq!(config.fullscreen_retry, RetryPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_options() {
        let mut config = QuizConfig::default();
        config.fullscreen_retry.attempts = 50;
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooManyRetryAttempts { max: 10 })
        );

        let mut config = QuizConfig::default();
        config.time_limit_secs = Some(0);
        assert_eq!(config.validate(), Err(ConfigError::InvalidTimeLimit));
    }
}
