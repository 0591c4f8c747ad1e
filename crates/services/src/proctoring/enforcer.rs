use proctor_core::model::{QuizConfig, Violation};
use serde::Serialize;

/// Payload delivered to the submission flow when the violation budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForceSubmit {
    pub reason: String,
    pub warnings: u32,
    pub violations: Vec<Violation>,
}

/// Decides when a session has used up its violation budget.
///
/// Raises at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdEnforcer {
    limit: u32,
    raised: bool,
}

impl ThresholdEnforcer {
    /// Builds an enforcer for `max_cheat_attempts`.
    ///
    /// Zero or negative limits breach on the first violation.
    #[must_use]
    pub fn new(max_cheat_attempts: i32) -> Self {
        Self {
            limit: u32::try_from(max_cheat_attempts.max(1)).unwrap_or(1),
            raised: false,
        }
    }

    #[must_use]
    pub fn from_config(config: &QuizConfig) -> Self {
        Self {
            limit: config.breach_limit(),
            raised: false,
        }
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    #[must_use]
    pub fn has_raised(&self) -> bool {
        self.raised
    }

    /// Inspect the count after an accumulation step.
    pub fn observe(&mut self, warning_count: u32, violations: &[Violation]) -> Option<ForceSubmit> {
        if self.raised || warning_count < self.limit {
            return None;
        }
        self.raised = true;
        Some(ForceSubmit {
            reason: format!(
                "Violation limit reached ({warning_count} of {} allowed)",
                self.limit
            ),
            warnings: warning_count,
            violations: violations.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proctor_core::model::ViolationKind;
    use proctor_core::time::fixed_now;

    fn log(n: usize) -> Vec<Violation> {
        (0..n)
            .map(|_| Violation::from_kind(ViolationKind::TabHidden, fixed_now()))
            .collect()
    }

    #[test]
    fn raises_once_at_limit() {
        let mut enforcer = ThresholdEnforcer::new(3);
        assert!(enforcer.observe(1, &log(1)).is_none());
        assert!(enforcer.observe(2, &log(2)).is_none());

        let signal = enforcer.observe(3, &log(3)).unwrap();
        assert_eq!(signal.warnings, 3);
        assert_eq!(signal.violations.len(), 3);
        assert!(enforcer.has_raised());

        assert!(enforcer.observe(4, &log(4)).is_none());
        assert!(enforcer.observe(5, &log(5)).is_none());
    }

    #[test]
    fn non_positive_limits_breach_on_first_violation() {
        for max in [0, -1, i32::MIN] {
            let mut enforcer = ThresholdEnforcer::new(max);
            assert_eq!(enforcer.limit(), 1);
            assert!(enforcer.observe(1, &log(1)).is_some());
        }
    }
}
