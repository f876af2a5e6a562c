// src/dag/transition.rs

//! Result types for state-machine transitions.

use std::path::PathBuf;

use crate::dag::action::ActionRunState;
use crate::dag::{JobName, RunId};

/// One ActionRun changing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub run: RunId,
    pub job_run: RunId,
    pub from: ActionRunState,
    pub to: ActionRunState,
}

/// Request to execute an ActionRun's command on its node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub run: RunId,
    pub job: JobName,
    pub node: String,
    pub command: String,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
}

/// Best-effort request to signal a running remote process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillRequest {
    pub run: RunId,
    pub node: String,
}

/// Everything that happened as the result of one transition call.
///
/// A single call can cascade: a success releases dependents and queued
/// successors, which may start or be cancelled in turn.
#[derive(Debug, Clone, Default)]
pub struct Transition {
    /// Every state change, in the order it happened.
    pub changes: Vec<StateChange>,
    /// Runs that entered `RUNNING` and need their command executed.
    pub dispatch: Vec<ExecRequest>,
    /// Running runs whose remote process should be signalled.
    pub kill: Vec<KillRequest>,
    /// ActionRuns that reached a terminal state.
    pub completed: Vec<RunId>,
    /// JobRuns whose last pending ActionRun reached a terminal state.
    pub job_runs_finished: Vec<RunId>,
}

impl Transition {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.dispatch.is_empty() && self.kill.is_empty()
    }

    /// Fold another transition's effects into this one.
    pub fn merge(&mut self, other: Transition) {
        self.changes.extend(other.changes);
        self.dispatch.extend(other.dispatch);
        self.kill.extend(other.kill);
        self.completed.extend(other.completed);
        self.job_runs_finished.extend(other.job_runs_finished);
    }
}
