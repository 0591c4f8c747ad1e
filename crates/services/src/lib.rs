#![forbid(unsafe_code)]

pub mod error;
pub mod proctoring;

pub use proctor_core::Clock;

pub use error::{AttemptError, ProctoringError};
pub use proctoring::{
    BrowserEnvironment, BrowserSignal, ClipboardAction, EnvironmentError, ForceSubmit,
    FullscreenSupport, HeadlessEnvironment, KeyPress, ListenerKind, ProctoredAttempt,
    ProctoringService, ProctoringSession, Recorded, SignalOutcome, ThresholdEnforcer,
    ViolationAccumulator, ViolationMonitor,
};
