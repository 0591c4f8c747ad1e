use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use proctor_core::model::{Violation, ViolationError, ViolationKind};

use super::enforcer::{ForceSubmit, ThresholdEnforcer};

/// Outcome of one `record_violation` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub warning_count: u32,
    /// False when the ledger was sealed and nothing changed.
    pub appended: bool,
    pub breach: Option<ForceSubmit>,
}

#[derive(Debug)]
struct Ledger {
    violations: Vec<Violation>,
    sealed: bool,
    enforcer: ThresholdEnforcer,
}

impl Ledger {
    fn warning_count(&self) -> u32 {
        u32::try_from(self.violations.len()).unwrap_or(u32::MAX)
    }
}

/// Single point of mutation for a session's warning count and violation log.
///
/// The count is the log length, so the two can never disagree. Appending,
/// counting and the threshold check happen under one lock.
#[derive(Debug)]
pub struct ViolationAccumulator {
    ledger: Mutex<Ledger>,
}

impl ViolationAccumulator {
    #[must_use]
    pub fn new(enforcer: ThresholdEnforcer) -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                violations: Vec::new(),
                sealed: false,
                enforcer,
            }),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a violation and run the threshold check.
    ///
    /// After `seal` this is a no-op that reports the final count.
    ///
    /// # Errors
    ///
    /// Returns `ViolationError::EmptyReason` if `reason` is blank.
    pub fn record_violation(
        &self,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Recorded, ViolationError> {
        let violation = Violation::new(reason, at)?;
        Ok(self.push(violation))
    }

    /// Append a classified violation.
    pub fn record_kind(&self, kind: ViolationKind, at: DateTime<Utc>) -> Recorded {
        self.push(Violation::from_kind(kind, at))
    }

    fn push(&self, violation: Violation) -> Recorded {
        let mut ledger = self.ledger();
        if ledger.sealed {
            return Recorded {
                warning_count: ledger.warning_count(),
                appended: false,
                breach: None,
            };
        }

        ledger.violations.push(violation);
        let warning_count = ledger.warning_count();
        let Ledger {
            violations,
            enforcer,
            ..
        } = &mut *ledger;
        let breach = enforcer.observe(warning_count, violations);

        Recorded {
            warning_count,
            appended: true,
            breach,
        }
    }

    /// Stop accepting violations and return the final log.
    pub fn seal(&self) -> Vec<Violation> {
        let mut ledger = self.ledger();
        ledger.sealed = true;
        ledger.violations.clone()
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.ledger().sealed
    }

    #[must_use]
    pub fn warning_count(&self) -> u32 {
        self.ledger().warning_count()
    }

    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        self.ledger().violations.clone()
    }
}
