// src/engine/control.rs

//! Control surface: trigger, cancel and list runs on a live runtime.
//!
//! Requests travel over the runtime event channel and are answered through
//! oneshot replies, so they are serialized with every other transition.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::dag::{ActionRun, ActionRunState, JobName, JobRun, JobRunState, RunId};
use crate::engine::RuntimeEvent;
use crate::errors::{DagcronError, Result};

#[derive(Debug)]
pub enum ControlRequest {
    Trigger {
        job: JobName,
        reply: oneshot::Sender<Result<JobRunSummary>>,
    },
    Cancel {
        run: RunId,
        reply: oneshot::Sender<Result<()>>,
    },
    ListRuns {
        job: JobName,
        reply: oneshot::Sender<Result<Vec<JobRunSummary>>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRunSummary {
    pub id: RunId,
    pub action: String,
    pub node: String,
    pub state: ActionRunState,
    pub blocked: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_status: Option<i32>,
}

impl From<&ActionRun> for ActionRunSummary {
    fn from(run: &ActionRun) -> Self {
        Self {
            id: run.id.clone(),
            action: run.action.clone(),
            node: run.node.clone(),
            state: run.state(),
            blocked: run.is_blocked(),
            start_time: run.start_time(),
            end_time: run.end_time(),
            exit_status: run.exit_status(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRunSummary {
    pub id: RunId,
    pub job: JobName,
    pub run_num: u64,
    pub run_time: DateTime<Utc>,
    pub state: JobRunState,
    pub actions: Vec<ActionRunSummary>,
}

impl From<&JobRun> for JobRunSummary {
    fn from(run: &JobRun) -> Self {
        Self {
            id: run.id.clone(),
            job: run.job.clone(),
            run_num: run.run_num,
            run_time: run.run_time,
            state: run.state(),
            actions: run.runs.iter().map(ActionRunSummary::from).collect(),
        }
    }
}

/// Cloneable client for a running [`crate::engine::Runtime`].
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<RuntimeEvent>,
}

impl ControlHandle {
    pub fn new(tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self { tx }
    }

    /// Build and start a new run of `job` right now.
    pub async fn trigger(&self, job: impl Into<JobName>) -> Result<JobRunSummary> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlRequest::Trigger {
            job: job.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| runtime_gone())?
    }

    pub async fn cancel(&self, run: impl Into<RunId>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlRequest::Cancel {
            run: run.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| runtime_gone())?
    }

    /// Runs of `job`, newest first.
    pub async fn list_runs(&self, job: impl Into<JobName>) -> Result<Vec<JobRunSummary>> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlRequest::ListRuns {
            job: job.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| runtime_gone())?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(RuntimeEvent::ShutdownRequested)
            .await
            .map_err(|_| runtime_gone())
    }

    async fn send(&self, request: ControlRequest) -> Result<()> {
        self.tx
            .send(RuntimeEvent::Control(request))
            .await
            .map_err(|_| runtime_gone())
    }
}

fn runtime_gone() -> DagcronError {
    DagcronError::Other(anyhow::anyhow!("runtime is not running"))
}
