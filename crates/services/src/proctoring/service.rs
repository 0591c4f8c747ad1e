use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use proctor_core::model::{EndReason, ParticipantId, QuizConfig, QuizId, ViolationRecord};
use storage::repository::ViolationRecordRepository;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;

use super::controller::ProctoringSession;
use super::enforcer::ForceSubmit;
use super::environment::BrowserEnvironment;
use crate::Clock;
use crate::error::{AttemptError, ProctoringError};

/// A started, proctored quiz attempt.
#[derive(Debug)]
pub struct ProctoredAttempt {
    pub session: Arc<ProctoringSession>,
    pub force_submit: oneshot::Receiver<ForceSubmit>,
    /// Ends the session when the quiz time limit runs out.
    pub deadline: Option<JoinHandle<Option<ViolationRecord>>>,
}

type AttemptKey = (QuizId, ParticipantId);

/// Opens proctored attempts and enforces the single-attempt policy.
#[derive(Clone)]
pub struct ProctoringService {
    clock: Clock,
    records: Arc<dyn ViolationRecordRepository>,
    /// Sessions opened by this service that may still be running.
    open: Arc<Mutex<HashMap<AttemptKey, Weak<ProctoringSession>>>>,
}

impl ProctoringService {
    #[must_use]
    pub fn new(clock: Clock, records: Arc<dyn ViolationRecordRepository>) -> Self {
        Self {
            clock,
            records,
            open: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn open(&self) -> MutexGuard<'_, HashMap<AttemptKey, Weak<ProctoringSession>>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot for `key`, unless a live session already holds it.
    fn claim(&self, key: AttemptKey, session: &Arc<ProctoringSession>) -> bool {
        let mut open = self.open();
        open.retain(|_, held| held.strong_count() > 0);
        let running = open
            .get(&key)
            .and_then(Weak::upgrade)
            .is_some_and(|existing| !existing.state().is_terminal());
        if running {
            return false;
        }
        open.insert(key, Arc::downgrade(session));
        true
    }

    fn release(&self, key: AttemptKey, session: &Arc<ProctoringSession>) {
        let mut open = self.open();
        if open
            .get(&key)
            .and_then(Weak::upgrade)
            .is_some_and(|held| Arc::ptr_eq(&held, session))
        {
            open.remove(&key);
        }
    }

    /// Whether a session for this participant is still open.
    #[must_use]
    pub fn has_open_attempt(&self, quiz_id: QuizId, participant_id: ParticipantId) -> bool {
        self.open()
            .get(&(quiz_id, participant_id))
            .and_then(Weak::upgrade)
            .is_some_and(|session| !session.state().is_terminal())
    }

    /// Start a proctored attempt for a participant.
    ///
    /// Refuses a second attempt unless the quiz allows retakes, and never
    /// opens two sessions at once for the same participant and quiz. Arms the
    /// time-limit deadline when the quiz has one.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::InProgress` while an earlier session is still
    /// open, `AttemptError::AlreadyAttempted` if a record already exists and
    /// retakes are off, `AttemptError::Storage` if the attempt count cannot
    /// be read, and `AttemptError::Proctoring` if the session fails to start.
    pub async fn begin_attempt(
        &self,
        quiz_id: QuizId,
        participant_id: ParticipantId,
        config: QuizConfig,
        env: Arc<dyn BrowserEnvironment>,
    ) -> Result<ProctoredAttempt, AttemptError> {
        let key = (quiz_id, participant_id);
        let session = Arc::new(
            ProctoringSession::new(quiz_id, participant_id, env, Arc::clone(&self.records))
                .with_clock(self.clock),
        );
        if !self.claim(key, &session) {
            return Err(AttemptError::InProgress {
                quiz_id,
                participant_id,
            });
        }

        let opened = self.open_session(&session, config).await;
        if opened.is_err() {
            self.release(key, &session);
        }
        let (force_submit, time_limit) = opened?;

        let deadline = time_limit.map(|limit| spawn_deadline(Arc::clone(&session), limit));
        Ok(ProctoredAttempt {
            session,
            force_submit,
            deadline,
        })
    }

    async fn open_session(
        &self,
        session: &ProctoringSession,
        config: QuizConfig,
    ) -> Result<(oneshot::Receiver<ForceSubmit>, Option<Duration>), AttemptError> {
        if !config.allow_retake {
            let attempts = self
                .records
                .count_attempts(session.quiz_id(), session.participant_id())
                .await?;
            if attempts > 0 {
                return Err(AttemptError::AlreadyAttempted {
                    quiz_id: session.quiz_id(),
                    attempts,
                });
            }
        }

        let force_submit = session.subscribe_force_submit().ok_or(
            ProctoringError::InvalidTransition {
                state: session.state(),
                action: "subscribe to",
            },
        )?;

        let time_limit = config.time_limit();
        session.start_session(config).await?;
        Ok((force_submit, time_limit))
    }
}

/// End `session` with `EndReason::TimeExpired` once `limit` has elapsed.
///
/// Resolves to `None` if the session was already over by then.
pub fn spawn_deadline(
    session: Arc<ProctoringSession>,
    limit: Duration,
) -> JoinHandle<Option<ViolationRecord>> {
    tokio::spawn(async move {
        tokio::time::sleep(limit).await;
        if !session.is_active() {
            return None;
        }
        info!(quiz_id = %session.quiz_id(), "quiz time limit reached");
        session.end_session(EndReason::TimeExpired).await
    })
}

/// Wait for a forced submission and finish the session with it.
///
/// Returns `None` when the session ended some other way and the channel closed.
pub async fn await_force_submit(
    session: &ProctoringSession,
    force_submit: oneshot::Receiver<ForceSubmit>,
) -> Option<(ForceSubmit, Option<ViolationRecord>)> {
    let signal = force_submit.await.ok()?;
    let record = session.end_session(EndReason::ForceSubmitted).await;
    Some((signal, record))
}
