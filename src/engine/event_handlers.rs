// src/engine/event_handlers.rs

//! Per-job event handling for the core runtime.

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::dag::{ExecRequest, Job, KillRequest, RunId, Transition};
use crate::errors::{ConnectionError, Result};
use crate::store::JobRunSnapshot;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these action runs to their nodes.
    Dispatch(Vec<ExecRequest>),
    /// Signal these running action runs.
    Kill(Vec<KillRequest>),
    /// Hand these snapshots to the run store.
    Persist(Vec<JobRunSnapshot>),
    /// Request that the process exits (used for `--once` when idle).
    RequestExit,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn idle() -> Self {
        Self {
            commands: Vec::new(),
            keep_running: true,
        }
    }
}

/// Start every JobRun whose time has arrived, then build the next one if the
/// job's scheduler wants it.
///
/// Returns the ids of newly built JobRuns alongside the transition. Build
/// errors are logged and never abort polling.
pub fn poll_job(job: &mut Job, now: DateTime<Utc>) -> (Vec<RunId>, Transition) {
    let mut tr = start_due_runs(job, now);
    let mut built = Vec::new();

    if job.wants_next_run() {
        match job.next_runs() {
            Ok(ids) => {
                built = ids;
                tr.merge(start_due_runs(job, now));
            }
            Err(err) => {
                error!(job = %job.name, error = %err, "failed to build next job run");
            }
        }
    }

    (built, tr)
}

fn start_due_runs(job: &mut Job, now: DateTime<Utc>) -> Transition {
    let mut tr = Transition::default();
    for id in job.due_runs(now) {
        match job.scheduled_start(&id) {
            Ok(step) => tr.merge(step),
            Err(err) => warn!(job = %job.name, run = %id, error = %err, "scheduled start failed"),
        }
    }
    tr
}

/// Build a JobRun for right now and start it.
pub fn trigger_job(job: &mut Job) -> Result<(RunId, Transition)> {
    let now = job.now();
    let id = job.build_run(now)?;
    let tr = job.scheduled_start(&id)?;
    Ok((id, tr))
}

/// Process exit reported by a node.
pub fn handle_action_exited(job: &mut Job, run: &str, status: i32) -> Transition {
    match job.handle_exit(run, status) {
        Ok(tr) => tr,
        Err(err) => {
            warn!(job = %job.name, run = %run, status, error = %err, "ignoring exit report");
            Transition::default()
        }
    }
}

/// Connection failure reported by a node.
pub fn handle_connection_failed(job: &mut Job, run: &str, error: &ConnectionError) -> Transition {
    debug!(job = %job.name, run = %run, node = %error.node, "marking run unknown after connection failure");
    match job.mark_unknown(run) {
        Ok(tr) => tr,
        Err(err) => {
            warn!(job = %job.name, run = %run, error = %err, "ignoring connection failure report");
            Transition::default()
        }
    }
}

/// Snapshots to persist for every ActionRun that became terminal.
pub fn snapshots_for(job: &Job, tr: &Transition, now: DateTime<Utc>) -> Vec<JobRunSnapshot> {
    tr.completed
        .iter()
        .filter_map(|run_id| {
            let action_run = job.action_run(run_id)?;
            let job_run = job.run(&action_run.job_run)?;
            Some(JobRunSnapshot::new(run_id.clone(), job_run, now))
        })
        .collect()
}
