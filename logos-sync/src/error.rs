//! Error types and the report shape handed to `on_error`.

use logos_core::{EngineError, RootsError};
use serde::Serialize;

/// Errors surfaced by the sync controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Roots(#[from] RootsError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("controller has been destroyed")]
    ControllerDestroyed,
}

/// When an error happened relative to the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPhase {
    /// Before the first session became ready.
    Initialization,
    /// While a session was live.
    Runtime,
    /// The watchdog failed to bring up a replacement session.
    Restart,
    /// Tearing the session down failed.
    Teardown,
}

/// Context passed alongside every reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorDetails {
    pub phase: ErrorPhase,
    /// Whether a replacement session is on its way.
    pub will_restart: bool,
}

impl ErrorDetails {
    pub fn new(phase: ErrorPhase, will_restart: bool) -> Self {
        Self { phase, will_restart }
    }

    pub fn initialization() -> Self {
        Self::new(ErrorPhase::Initialization, false)
    }

    pub fn runtime(will_restart: bool) -> Self {
        Self::new(ErrorPhase::Runtime, will_restart)
    }
}
