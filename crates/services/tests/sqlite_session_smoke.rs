use std::sync::Arc;

use proctor_core::model::{EndReason, ParticipantId, QuizConfig, QuizId};
use proctor_core::time::fixed_now;
use services::{BrowserSignal, Clock, HeadlessEnvironment, KeyPress, ProctoringService};
use services::proctoring::await_force_submit;
use storage::repository::Storage;

#[tokio::test]
async fn forced_submission_is_persisted_to_sqlite() {
    let storage = Storage::sqlite("sqlite:file:memdb_session_smoke?mode=memory&cache=shared")
        .await
        .expect("connect sqlite");
    let service = ProctoringService::new(Clock::fixed(fixed_now()), Arc::clone(&storage.records));
    let config = QuizConfig {
        enable_full_screen: false,
        max_cheat_attempts: 2,
        ..QuizConfig::default()
    };

    let attempt = service
        .begin_attempt(
            QuizId::new(12),
            ParticipantId::new(3),
            config.clone(),
            Arc::new(HeadlessEnvironment::new()),
        )
        .await
        .expect("begin attempt");

    for signal in [
        BrowserSignal::VisibilityChange { hidden: true },
        BrowserSignal::KeyDown(KeyPress::ctrl("U")),
    ] {
        attempt.session.handle_signal(&signal).await;
    }

    let (signal, record) = await_force_submit(&attempt.session, attempt.force_submit)
        .await
        .expect("force submit raised");
    let record = record.expect("record stored");
    assert_eq!(signal.warnings, 2);
    assert_eq!(record.end_reason(), &EndReason::ForceSubmitted);

    let stored = storage.records.list_records(QuizId::new(12), 5).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].record, record);

    let again = service
        .begin_attempt(
            QuizId::new(12),
            ParticipantId::new(3),
            config,
            Arc::new(HeadlessEnvironment::new()),
        )
        .await;
    assert!(again.is_err());
}
