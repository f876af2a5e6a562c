// src/dag/action.rs

//! Action definitions and their per-invocation runs.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::{ActionName, RunId};
use crate::exec::NodePool;

/// Static definition of one step of a job.
#[derive(Debug, Clone)]
pub struct Action {
    pub name: ActionName,
    /// Command template, expanded once per ActionRun (see [`crate::template`]).
    pub command: String,
    /// Names of actions in the same job that must succeed first.
    pub required_actions: Vec<ActionName>,
    /// Overrides the job's node pool when set.
    pub node_pool: Option<Arc<NodePool>>,
}

impl Action {
    pub fn new(name: impl Into<ActionName>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            required_actions: Vec::new(),
            node_pool: None,
        }
    }

    pub fn requires(mut self, action: impl Into<ActionName>) -> Self {
        self.required_actions.push(action.into());
        self
    }

    pub fn with_node_pool(mut self, pool: Arc<NodePool>) -> Self {
        self.node_pool = Some(pool);
        self
    }
}

/// State of a single ActionRun.
///
/// ```text
/// SCHEDULED -> QUEUED -> RUNNING -> SUCCEEDED | FAILED
///     \           \          \----> UNKNOWN (host unreachable)
///      \-----------\------> CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionRunState {
    Scheduled,
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// The transport could not reach the host; the command outcome is unknown.
    Unknown,
}

impl ActionRunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionRunState::Succeeded
                | ActionRunState::Failed
                | ActionRunState::Cancelled
                | ActionRunState::Unknown
        )
    }
}

impl fmt::Display for ActionRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionRunState::Scheduled => "scheduled",
            ActionRunState::Queued => "queued",
            ActionRunState::Running => "running",
            ActionRunState::Succeeded => "succeeded",
            ActionRunState::Failed => "failed",
            ActionRunState::Cancelled => "cancelled",
            ActionRunState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One execution of an [`Action`] inside a JobRun.
///
/// Holds only identifiers of its action, its JobRun and the peer runs it
/// depends on. State changes go through [`crate::dag::state_manager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRun {
    pub id: RunId,
    pub action: ActionName,
    pub job_run: RunId,
    /// Fully expanded command.
    pub command: String,
    /// Hostname resolved at build time.
    pub node: String,
    /// ActionRuns of the same JobRun that must succeed first.
    pub required_runs: Vec<RunId>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,

    pub(crate) state: ActionRunState,
    /// Sub-state of `Scheduled`: some required run has not succeeded yet.
    pub(crate) blocked_on_dependency: bool,
    pub(crate) start_time: Option<DateTime<Utc>>,
    pub(crate) end_time: Option<DateTime<Utc>>,
    pub(crate) exit_status: Option<i32>,
}

impl ActionRun {
    pub fn state(&self) -> ActionRunState {
        self.state
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    pub fn is_scheduled(&self) -> bool {
        self.state == ActionRunState::Scheduled
    }

    pub fn is_blocked(&self) -> bool {
        self.is_scheduled() && self.blocked_on_dependency
    }

    /// Waiting either behind an earlier run or on a dependency.
    pub fn is_queued(&self) -> bool {
        self.state == ActionRunState::Queued || self.is_blocked()
    }

    pub fn is_running(&self) -> bool {
        self.state == ActionRunState::Running
    }

    pub fn is_success(&self) -> bool {
        self.state == ActionRunState::Succeeded
    }

    pub fn is_failure(&self) -> bool {
        self.state == ActionRunState::Failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == ActionRunState::Cancelled
    }

    pub fn is_unknown(&self) -> bool {
        self.state == ActionRunState::Unknown
    }

    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }
}
