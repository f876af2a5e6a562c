// src/engine/mod.rs

//! Orchestration engine for dagcron.
//!
//! This module ties together:
//! - the jobs and their run-state machines
//! - schedule polling (building and starting runs when their time arrives)
//! - the main runtime event loop that reacts to:
//!   - poll ticks
//!   - process exits and connection failures reported by nodes
//!   - control requests (trigger / cancel / list)
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]. All state transitions happen on the task that
//! drives the runtime loop.

use crate::dag::RunId;
use crate::errors::ConnectionError;

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// Poll schedules only at startup, so only runs due at that moment
    /// start, and exit once every started run is settled (used for `--once`).
    pub exit_when_idle: bool,
}

/// Events flowing into the runtime from the ticker, nodes and controllers.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// Time to check schedules.
    Tick,
    /// A control-surface call.
    Control(ControlRequest),
    /// The remote process of an ActionRun exited.
    ActionExited { run: RunId, status: i32 },
    /// The node could not run or finish the ActionRun's channel.
    ConnectionFailed { run: RunId, error: ConnectionError },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod control;
pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use control::{ActionRunSummary, ControlHandle, ControlRequest, JobRunSummary};
pub use core::{CoreRuntime, RunObserver};
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
