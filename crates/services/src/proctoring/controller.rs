use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::{DateTime, Utc};
use proctor_core::model::{
    EndReason, ParticipantId, QuizConfig, QuizId, RetryPolicy, SessionState, Violation,
    ViolationKind, ViolationRecord,
};
use storage::repository::ViolationRecordRepository;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::accumulator::{Recorded, ViolationAccumulator};
use super::enforcer::{ForceSubmit, ThresholdEnforcer};
use super::environment::{BrowserEnvironment, ListenerKind};
use super::monitor::ViolationMonitor;
use super::signal::BrowserSignal;
use crate::Clock;
use crate::error::{FULLSCREEN_REQUIRED, ProctoringError};

//
// ─── SIGNAL OUTCOME ────────────────────────────────────────────────────────────
//

/// What the host should do with a browser event after the session saw it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignalOutcome {
    /// Violations appended for this signal; a failed fullscreen re-entry adds a second.
    pub recorded: Vec<ViolationKind>,
    pub prevent_default: bool,
    pub warning_count: u32,
    /// True if this signal crossed the violation limit.
    pub force_submitted: bool,
}

//
// ─── LIFECYCLE ─────────────────────────────────────────────────────────────────
//

#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
    monitor: Option<ViolationMonitor>,
    retry: RetryPolicy,
    last_error: Option<String>,
    started_at: Option<DateTime<Utc>>,
}

impl Lifecycle {
    fn transition_to(
        &mut self,
        next: SessionState,
        action: &'static str,
    ) -> Result<(), ProctoringError> {
        if !self.state.can_transition_to(next) {
            return Err(ProctoringError::InvalidTransition {
                state: self.state,
                action,
            });
        }
        self.state = next;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ForceSubmitChannel {
    sender: Option<oneshot::Sender<ForceSubmit>>,
    subscribed: bool,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// Proctoring state machine for one quiz attempt.
///
/// `Idle -> Initializing -> Active -> Terminating -> Terminated`, with
/// `Initializing -> Terminated` when startup fails. Transitions are
/// serialized; browser signals are accepted only while `Active`.
pub struct ProctoringSession {
    quiz_id: QuizId,
    participant_id: ParticipantId,
    clock: Clock,
    env: Arc<dyn BrowserEnvironment>,
    records: Arc<dyn ViolationRecordRepository>,
    transition: tokio::sync::Mutex<()>,
    lifecycle: Mutex<Lifecycle>,
    ledger: OnceLock<ViolationAccumulator>,
    terminating: AtomicBool,
    force_submit: Mutex<ForceSubmitChannel>,
}

impl ProctoringSession {
    #[must_use]
    pub fn new(
        quiz_id: QuizId,
        participant_id: ParticipantId,
        env: Arc<dyn BrowserEnvironment>,
        records: Arc<dyn ViolationRecordRepository>,
    ) -> Self {
        Self {
            quiz_id,
            participant_id,
            clock: Clock::default(),
            env,
            records,
            transition: tokio::sync::Mutex::new(()),
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Idle,
                monitor: None,
                retry: RetryPolicy::default(),
                last_error: None,
                started_at: None,
            }),
            ledger: OnceLock::new(),
            terminating: AtomicBool::new(false),
            force_submit: Mutex::new(ForceSubmitChannel::default()),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channel(&self) -> MutexGuard<'_, ForceSubmitChannel> {
        self.force_submit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the single consumer of the force-submit signal.
    ///
    /// Returns `None` if a consumer is already registered.
    pub fn subscribe_force_submit(&self) -> Option<oneshot::Receiver<ForceSubmit>> {
        let mut channel = self.channel();
        if channel.subscribed {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        channel.sender = Some(tx);
        channel.subscribed = true;
        Some(rx)
    }

    //
    // ─── OBSERVABLE STATE ──────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    #[must_use]
    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lifecycle().state
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    #[must_use]
    pub fn warning_count(&self) -> u32 {
        self.ledger
            .get()
            .map_or(0, ViolationAccumulator::warning_count)
    }

    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        self.ledger
            .get()
            .map(ViolationAccumulator::violations)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.lifecycle().last_error.clone()
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lifecycle().started_at
    }

    #[must_use]
    pub fn installed_listeners(&self) -> Vec<ListenerKind> {
        self.lifecycle()
            .monitor
            .as_ref()
            .map(|m| m.installed().to_vec())
            .unwrap_or_default()
    }

    //
    // ─── STARTUP ───────────────────────────────────────────────────────────────
    //

    /// Start proctoring with the quiz's configuration.
    ///
    /// # Errors
    ///
    /// Returns `ProctoringError::FullscreenRequired` when fullscreen is
    /// mandatory and the browser refuses it; the session is then
    /// `Terminated` with no listeners installed.
    /// Returns `ProctoringError::InvalidTransition` unless the session is `Idle`.
    /// Returns `ProctoringError::Config` for out-of-range options.
    pub async fn start_session(&self, config: QuizConfig) -> Result<(), ProctoringError> {
        config.validate()?;
        let _transition = self.transition.lock().await;

        self.lifecycle()
            .transition_to(SessionState::Initializing, "start")?;
        debug!(quiz_id = %self.quiz_id, "proctoring session initializing");

        if config.enable_full_screen {
            if let Err(source) = self.env.request_fullscreen().await {
                warn!(
                    quiz_id = %self.quiz_id,
                    error = %source,
                    "fullscreen refused, quiz cannot start"
                );
                let mut lifecycle = self.lifecycle();
                lifecycle.last_error = Some(format!("{FULLSCREEN_REQUIRED}: {source}"));
                lifecycle.transition_to(SessionState::Terminated, "abort")?;
                return Err(ProctoringError::FullscreenRequired {
                    message: FULLSCREEN_REQUIRED.to_owned(),
                    source,
                });
            }
        }

        let fresh = self
            .ledger
            .set(ViolationAccumulator::new(ThresholdEnforcer::from_config(&config)))
            .is_ok();
        debug_assert!(fresh, "violation ledger installed twice");

        let mut monitor = ViolationMonitor::from_config(&config);
        monitor.install(self.env.as_ref());

        let mut lifecycle = self.lifecycle();
        lifecycle.monitor = Some(monitor);
        lifecycle.retry = config.fullscreen_retry;
        lifecycle.last_error = None;
        lifecycle.started_at = Some(self.clock.now());
        lifecycle.transition_to(SessionState::Active, "activate")?;
        info!(
            quiz_id = %self.quiz_id,
            participant_id = %self.participant_id,
            max_cheat_attempts = config.max_cheat_attempts,
            "proctoring session active"
        );
        Ok(())
    }

    //
    // ─── VIOLATIONS ────────────────────────────────────────────────────────────
    //

    /// Feed one browser event into the session.
    ///
    /// A fullscreen exit triggers the configured re-entry policy before this
    /// returns.
    pub async fn handle_signal(&self, signal: &BrowserSignal) -> SignalOutcome {
        let (classification, retry) = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state != SessionState::Active {
                return SignalOutcome {
                    warning_count: self.warning_count(),
                    ..SignalOutcome::default()
                };
            }
            let retry = lifecycle.retry;
            let Some(monitor) = lifecycle.monitor.as_mut() else {
                return SignalOutcome::default();
            };
            (monitor.classify(signal), retry)
        };

        let mut outcome = SignalOutcome {
            prevent_default: classification.prevent_default,
            warning_count: self.warning_count(),
            ..SignalOutcome::default()
        };
        let Some(kind) = classification.kind else {
            return outcome;
        };

        self.apply(kind, &mut outcome);

        if kind == ViolationKind::FullscreenExited && !self.reenter_fullscreen(retry).await {
            self.apply(ViolationKind::FullscreenReentryFailed, &mut outcome);
        }

        outcome
    }

    fn apply(&self, kind: ViolationKind, outcome: &mut SignalOutcome) {
        let Some(ledger) = self.ledger.get() else {
            return;
        };
        let recorded = ledger.record_kind(kind, self.clock.now());
        if recorded.appended {
            outcome.recorded.push(kind);
            debug!(
                quiz_id = %self.quiz_id,
                reason = kind.reason(),
                warning_count = recorded.warning_count,
                "violation recorded"
            );
        }
        outcome.warning_count = recorded.warning_count;
        if let Some(signal) = recorded.breach {
            outcome.force_submitted = self.raise_force_submit(signal);
        }
    }

    /// Record a violation detected outside the browser listeners, such as
    /// the webcam monitor.
    ///
    /// No-op before start and after teardown.
    ///
    /// # Errors
    ///
    /// Returns `ProctoringError::Violation` if `reason` is blank.
    pub fn record_violation(&self, reason: &str) -> Result<Recorded, ProctoringError> {
        let Some(ledger) = self.ledger.get() else {
            return Ok(Recorded {
                warning_count: 0,
                appended: false,
                breach: None,
            });
        };
        let mut recorded = ledger.record_violation(reason, self.clock.now())?;
        if let Some(signal) = recorded.breach.clone() {
            if !self.raise_force_submit(signal) {
                recorded.breach = None;
            }
        }
        Ok(recorded)
    }

    /// Try to get back into fullscreen. Returns false if every attempt failed.
    async fn reenter_fullscreen(&self, policy: RetryPolicy) -> bool {
        if policy.attempts == 0 {
            return true;
        }
        for attempt in 1..=policy.attempts {
            tokio::time::sleep(policy.delay()).await;
            // Held across the request so teardown sees whatever fullscreen it engaged.
            let _transition = self.transition.lock().await;
            if !self.is_active() {
                return true;
            }
            match self.env.request_fullscreen().await {
                Ok(()) => {
                    debug!(quiz_id = %self.quiz_id, attempt, "fullscreen restored");
                    return true;
                }
                Err(err) => {
                    warn!(quiz_id = %self.quiz_id, attempt, error = %err, "fullscreen re-entry failed");
                }
            }
        }
        false
    }

    fn raise_force_submit(&self, signal: ForceSubmit) -> bool {
        if self.terminating.load(Ordering::SeqCst) {
            debug!(quiz_id = %self.quiz_id, "breach after teardown began, signal suppressed");
            return false;
        }
        info!(
            quiz_id = %self.quiz_id,
            participant_id = %self.participant_id,
            warnings = signal.warnings,
            "violation limit reached, forcing submission"
        );
        let Some(sender) = self.channel().sender.take() else {
            warn!(quiz_id = %self.quiz_id, "no force-submit consumer registered");
            return true;
        };
        if sender.send(signal).is_err() {
            warn!(quiz_id = %self.quiz_id, "force-submit consumer dropped");
        }
        true
    }

    //
    // ─── TEARDOWN ──────────────────────────────────────────────────────────────
    //

    /// End the session and persist its violation record.
    ///
    /// Returns `None` if the session never became active, already ended, or
    /// the record could not be stored. Storage failures are logged and never
    /// keep the session from reaching `Terminated`.
    pub async fn end_session(&self, reason: EndReason) -> Option<ViolationRecord> {
        let _transition = self.transition.lock().await;

        let started_at = {
            let mut lifecycle = self.lifecycle();
            // A session that never started is discarded without a record.
            let next = if lifecycle.state == SessionState::Idle {
                SessionState::Terminated
            } else {
                SessionState::Terminating
            };
            if let Err(err) = lifecycle.transition_to(next, "end") {
                debug!(quiz_id = %self.quiz_id, error = %err, "end_session ignored");
                return None;
            }
            if next == SessionState::Terminated {
                return None;
            }
            lifecycle.started_at
        };
        self.terminating.store(true, Ordering::SeqCst);
        info!(
            quiz_id = %self.quiz_id,
            end_reason = reason.as_str(),
            "proctoring session terminating"
        );

        let violations = self
            .ledger
            .get()
            .map(ViolationAccumulator::seal)
            .unwrap_or_default();

        {
            let mut lifecycle = self.lifecycle();
            if let Some(monitor) = lifecycle.monitor.as_mut() {
                monitor.remove(self.env.as_ref());
            }
        }
        // Any pending consumer sees the channel close.
        self.channel().sender.take();

        if self.env.is_fullscreen() {
            if let Err(err) = self.env.exit_fullscreen().await {
                warn!(quiz_id = %self.quiz_id, error = %err, "could not exit fullscreen");
            }
        }

        let record = self.persist(violations, reason, started_at).await;
        if let Err(err) = self
            .lifecycle()
            .transition_to(SessionState::Terminated, "finish")
        {
            error!(quiz_id = %self.quiz_id, error = %err, "teardown left session unfinished");
        }
        record
    }

    async fn persist(
        &self,
        violations: Vec<Violation>,
        reason: EndReason,
        started_at: Option<DateTime<Utc>>,
    ) -> Option<ViolationRecord> {
        let completed_at = self.clock.now();
        let record = match ViolationRecord::from_session(
            self.quiz_id,
            self.participant_id,
            violations,
            reason,
            started_at.unwrap_or(completed_at),
            completed_at,
        ) {
            Ok(record) => record,
            Err(err) => {
                error!(quiz_id = %self.quiz_id, error = %err, "violation record invalid");
                return None;
            }
        };

        match self.records.append_record(&record).await {
            Ok(record_id) => {
                info!(
                    quiz_id = %self.quiz_id,
                    record_id,
                    warning_count = record.warning_count(),
                    "violation record stored"
                );
                Some(record)
            }
            Err(err) => {
                error!(
                    quiz_id = %self.quiz_id,
                    participant_id = %self.participant_id,
                    error = %err,
                    "violation record could not be stored"
                );
                None
            }
        }
    }
}

impl Drop for ProctoringSession {
    fn drop(&mut self) {
        let lifecycle = self
            .lifecycle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(monitor) = lifecycle.monitor.as_mut() {
            let leaked = monitor.remove(self.env.as_ref());
            if leaked > 0 {
                warn!(quiz_id = %self.quiz_id, leaked, "session dropped while listeners were installed");
            }
        }
    }
}

impl fmt::Debug for ProctoringSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProctoringSession")
            .field("quiz_id", &self.quiz_id)
            .field("participant_id", &self.participant_id)
            .field("state", &self.state())
            .field("warning_count", &self.warning_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proctoring::environment::{FullscreenSupport, HeadlessEnvironment};
    use crate::proctoring::signal::KeyPress;
    use proctor_core::time::fixed_clock;
    use storage::repository::InMemoryRepository;

    fn session(env: &Arc<HeadlessEnvironment>) -> (ProctoringSession, InMemoryRepository) {
        let repo = InMemoryRepository::new();
        let session = ProctoringSession::new(
            QuizId::new(1),
            ParticipantId::new(2),
            env.clone(),
            Arc::new(repo.clone()),
        )
        .with_clock(fixed_clock());
        (session, repo)
    }

    #[tokio::test]
    async fn signals_before_start_are_ignored() {
        let env = Arc::new(HeadlessEnvironment::new());
        let (session, _repo) = session(&env);

        let outcome = session.handle_signal(&BrowserSignal::ContextMenu).await;
        assert!(outcome.recorded.is_empty());
        assert!(!outcome.prevent_default);
        assert_eq!(session.warning_count(), 0);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let env = Arc::new(HeadlessEnvironment::new());
        let (session, _repo) = session(&env);
        session.start_session(QuizConfig::default()).await.unwrap();

        let err = session
            .start_session(QuizConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProctoringError::InvalidTransition {
                state: SessionState::Active,
                ..
            }
        ));
        assert_eq!(env.fullscreen_requests(), 1);
    }

    #[tokio::test]
    async fn only_one_force_submit_consumer() {
        let env = Arc::new(HeadlessEnvironment::new());
        let (session, _repo) = session(&env);
        assert!(session.subscribe_force_submit().is_some());
        assert!(session.subscribe_force_submit().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reentry_records_second_violation() {
        let env = Arc::new(HeadlessEnvironment::new());
        let (session, _repo) = session(&env);
        session.start_session(QuizConfig::default()).await.unwrap();

        env.leave_fullscreen();
        env.set_support(FullscreenSupport::Denied);
        let outcome = session
            .handle_signal(&BrowserSignal::FullscreenChange { active: false })
            .await;

        assert_eq!(
            outcome.recorded,
            vec![
                ViolationKind::FullscreenExited,
                ViolationKind::FullscreenReentryFailed
            ]
        );
        assert_eq!(outcome.warning_count, 2);
        // One startup request plus one retry.
        assert_eq!(env.fullscreen_requests(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_reentry_records_only_the_exit() {
        let env = Arc::new(HeadlessEnvironment::new());
        let (session, _repo) = session(&env);
        session.start_session(QuizConfig::default()).await.unwrap();

        env.leave_fullscreen();
        let outcome = session
            .handle_signal(&BrowserSignal::FullscreenChange { active: false })
            .await;
        assert_eq!(outcome.recorded.len(), 1);
        assert!(env.is_fullscreen());
    }

    #[tokio::test]
    async fn external_detectors_share_the_budget() {
        let env = Arc::new(HeadlessEnvironment::new());
        let (session, _repo) = session(&env);
        let mut rx = session.subscribe_force_submit().unwrap();
        session.start_session(QuizConfig::unmonitored(2)).await.unwrap();

        session
            .handle_signal(&BrowserSignal::KeyDown(KeyPress::plain("F12")))
            .await;
        let recorded = session.record_violation("Multiple faces detected").unwrap();
        assert_eq!(recorded.warning_count, 2);
        assert!(recorded.breach.is_some());

        let signal = rx.try_recv().unwrap();
        assert_eq!(signal.warnings, 2);
        assert_eq!(signal.violations[1].reason(), "Multiple faces detected");
    }

    #[tokio::test]
    async fn dropping_an_active_session_releases_listeners() {
        let env = Arc::new(HeadlessEnvironment::new());
        {
            let (session, _repo) = session(&env);
            session.start_session(QuizConfig::default()).await.unwrap();
            assert!(env.total_listeners() > 0);
        }
        assert_eq!(env.total_listeners(), 0);
    }

    #[tokio::test]
    async fn ending_an_idle_session_skips_persistence() {
        let env = Arc::new(HeadlessEnvironment::new());
        let (session, repo) = session(&env);
        assert!(session.end_session(EndReason::Submitted).await.is_none());
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(repo.list_records(QuizId::new(1), 10).await.unwrap().is_empty());

        let err = session
            .start_session(QuizConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProctoringError::InvalidTransition { .. }));
    }
}
