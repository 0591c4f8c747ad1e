mod accumulator;
mod controller;
mod enforcer;
mod environment;
mod monitor;
mod service;
mod signal;

// Public API of the proctoring subsystem.
pub use accumulator::{Recorded, ViolationAccumulator};
pub use controller::{ProctoringSession, SignalOutcome};
pub use enforcer::{ForceSubmit, ThresholdEnforcer};
pub use environment::{
    BrowserEnvironment, EnvironmentError, FullscreenSupport, HeadlessEnvironment, ListenerKind,
};
pub use monitor::{Classification, ViolationMonitor};
pub use service::{ProctoredAttempt, ProctoringService, await_force_submit, spawn_deadline};
pub use signal::{BrowserSignal, ClipboardAction, KeyPress};
