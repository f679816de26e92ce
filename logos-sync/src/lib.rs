//! # logos-sync — Multi-root session sync controller
//!
//! Keeps one multi-root editing session consistent with external root maps
//! and survives engine crashes by recreating the session from those maps.
//!
//! ## Architecture
//!
//! ```text
//!  external state ──set_*──▸ ┌──────────────────────┐
//!                            │ MultiRootController  │◂── subscribe()
//!                            └───┬──────────┬───────┘
//!                                │          │
//!                     ┌──────────▼───┐  ┌───▼──────────┐
//!                     │ Synchronizer │  │ EventBridge  │──▸ callbacks
//!                     └──────────┬───┘  └───▲──────────┘
//!                                │          │ events
//!                            ┌───▼──────────┴───┐
//!                            │ session (Editor) │
//!                            └───▲──────────────┘
//!                                │ create / destroy / restart
//!                       ┌────────┴─────────┐
//!                       │ SessionLifecycle │── EditorWatchdog / ContextWatchdog
//!                       └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`controller`] — state machine and public facade
//! - [`synchronizer`] — external ⇄ session reconciliation
//! - [`bridge`] — session events to callbacks
//! - [`lifecycle`] — direct, watchdog or context-supervised sessions
//! - [`watchdog`] — crash supervisors
//! - [`config`] — controller configuration and callbacks
//! - [`error`] — error types and report details

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod bridge;
pub mod config;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod synchronizer;
pub mod watchdog;

pub use bridge::{ChangeSink, EventBridge};
pub use config::{Callbacks, ControllerConfig, WatchdogConfig};
pub use controller::{ControllerSnapshot, ControllerState, ControllerStatus, MultiRootController};
pub use error::{ErrorDetails, ErrorPhase, SyncError};
pub use lifecycle::{SessionLifecycle, SessionSlot};
pub use synchronizer::{ReconcileReport, RootSynchronizer};
pub use watchdog::{
    ContextWatchdog, EditorWatchdog, FailureHandler, ItemFailureHandler, RestartHandler, Watchdog,
    WatchdogFailure, WatchdogState,
};

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
