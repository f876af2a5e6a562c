// src/dag/job.rs

//! Jobs, their run history, and JobRun building.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::dag::action::{Action, ActionRun, ActionRunState};
use crate::dag::graph::ActionGraph;
use crate::dag::{ActionName, JobName, RunId};
use crate::errors::{DagcronError, Result};
use crate::exec::NodePool;
use crate::schedule::Scheduler;
use crate::template::{self, TemplateContext};
use crate::types::QueueingPolicy;

/// Aggregate state of a JobRun, always derived from its ActionRuns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobRunState {
    Scheduled,
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Unknown,
}

impl fmt::Display for JobRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobRunState::Scheduled => "scheduled",
            JobRunState::Queued => "queued",
            JobRunState::Running => "running",
            JobRunState::Succeeded => "succeeded",
            JobRunState::Failed => "failed",
            JobRunState::Cancelled => "cancelled",
            JobRunState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One invocation of a job at a fixed scheduled time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: RunId,
    pub run_num: u64,
    pub job: JobName,
    pub run_time: DateTime<Utc>,
    /// One ActionRun per action, in topological order.
    pub runs: Vec<ActionRun>,
    /// Whether `scheduled_start` has been applied to this JobRun.
    pub(crate) start_requested: bool,
}

impl JobRun {
    pub fn state(&self) -> JobRunState {
        let all = |state: ActionRunState| self.runs.iter().all(|r| r.state == state);
        let any = |state: ActionRunState| self.runs.iter().any(|r| r.state == state);

        if any(ActionRunState::Running) {
            return JobRunState::Running;
        }
        if all(ActionRunState::Succeeded) {
            return JobRunState::Succeeded;
        }
        if all(ActionRunState::Cancelled) {
            return JobRunState::Cancelled;
        }

        if self.runs.iter().all(ActionRun::is_done) {
            if any(ActionRunState::Failed) {
                JobRunState::Failed
            } else if any(ActionRunState::Unknown) {
                JobRunState::Unknown
            } else {
                JobRunState::Cancelled
            }
        } else if self.runs.iter().any(ActionRun::is_queued) {
            JobRunState::Queued
        } else {
            JobRunState::Scheduled
        }
    }

    pub fn start_requested(&self) -> bool {
        self.start_requested
    }

    pub fn is_done(&self) -> bool {
        self.runs.iter().all(ActionRun::is_done)
    }

    /// Started, unfinished, and nothing left that can make progress: every
    /// pending ActionRun is blocked behind a requirement that will never
    /// succeed.
    pub fn is_stalled(&self) -> bool {
        self.start_requested
            && !self.is_done()
            && !self
                .runs
                .iter()
                .any(|r| r.is_running() || r.state() == ActionRunState::Queued)
    }

    pub fn is_running(&self) -> bool {
        self.state() == JobRunState::Running
    }

    pub fn is_queued(&self) -> bool {
        self.state() == JobRunState::Queued
    }

    pub fn is_success(&self) -> bool {
        self.state() == JobRunState::Succeeded
    }

    pub fn is_failure(&self) -> bool {
        self.state() == JobRunState::Failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == JobRunState::Cancelled
    }

    /// The ActionRun of the named action.
    pub fn action_run(&self, action: &str) -> Option<&ActionRun> {
        self.runs.iter().find(|r| r.action == action)
    }
}

/// A recurring unit of work: a DAG of actions plus scheduling policy and the
/// history of its runs.
#[derive(Debug)]
pub struct Job {
    pub name: JobName,
    actions: HashMap<ActionName, Action>,
    pub(crate) graph: ActionGraph,
    pub node_pool: Arc<NodePool>,
    /// `None` means the job is never scheduled automatically.
    pub scheduler: Option<Scheduler>,
    pub queueing: QueueingPolicy,
    /// Directory for per-run stdout/stderr files; output is discarded if unset.
    pub output_dir: Option<PathBuf>,
    /// Newest scheduled time first.
    pub(crate) runs: VecDeque<JobRun>,
    run_counter: u64,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Job {
    /// Build a job, rejecting cyclic or dangling action requirements.
    pub fn new(
        name: impl Into<JobName>,
        actions: Vec<Action>,
        node_pool: Arc<NodePool>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let name = name.into();
        if actions.is_empty() {
            return Err(DagcronError::ConfigError(format!(
                "job '{name}' has no actions"
            )));
        }
        let graph = ActionGraph::build(&name, &actions)?;
        let actions = actions
            .into_iter()
            .map(|a| (a.name.clone(), a))
            .collect();

        debug!(job = %name, order = ?graph.topo_order(), "job loaded");

        Ok(Self {
            name,
            actions,
            graph,
            node_pool,
            scheduler: None,
            queueing: QueueingPolicy::default(),
            output_dir: None,
            runs: VecDeque::new(),
            run_counter: 0,
            clock,
        })
    }

    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_queueing(mut self, queueing: QueueingPolicy) -> Self {
        self.queueing = queueing;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Current time according to the job's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    /// Action names in dependency order.
    pub fn topo_actions(&self) -> &[ActionName] {
        self.graph.topo_order()
    }

    pub fn graph(&self) -> &ActionGraph {
        &self.graph
    }

    /// Run history, newest scheduled time first.
    pub fn runs(&self) -> impl Iterator<Item = &JobRun> {
        self.runs.iter()
    }

    pub fn run(&self, id: &str) -> Option<&JobRun> {
        self.runs.iter().find(|r| r.id == id)
    }

    pub fn action_run(&self, id: &str) -> Option<&ActionRun> {
        self.runs
            .iter()
            .flat_map(|jr| jr.runs.iter())
            .find(|r| r.id == id)
    }

    /// Whether some JobRun still has a non-terminal ActionRun.
    pub fn has_unfinished_runs(&self) -> bool {
        self.runs.iter().any(|r| !r.is_done())
    }

    /// Whether some JobRun is still waiting for its scheduled time.
    pub fn has_pending_start(&self) -> bool {
        self.runs.iter().any(|r| !r.start_requested)
    }

    /// JobRuns whose scheduled time has arrived but which were not started,
    /// oldest first.
    pub fn due_runs(&self, now: DateTime<Utc>) -> Vec<RunId> {
        self.runs
            .iter()
            .rev()
            .filter(|r| !r.start_requested && r.run_time <= now)
            .map(|r| r.id.clone())
            .collect()
    }

    /// Whether the scheduling loop should build another run now.
    pub fn wants_next_run(&self) -> bool {
        let Some(scheduler) = &self.scheduler else {
            return false;
        };
        if self.has_pending_start() {
            return false;
        }
        !(scheduler.waits_for_completion() && self.has_unfinished_runs())
    }

    /// Ask the scheduler for the next invocation and build it.
    ///
    /// Returns no runs when the job has no scheduler or the scheduler yields
    /// nothing; otherwise exactly one new JobRun.
    pub fn next_runs(&mut self) -> Result<Vec<RunId>> {
        let Some(scheduler) = &self.scheduler else {
            return Ok(Vec::new());
        };
        let last = self.runs.front().map(|r| r.run_time);
        match scheduler.next_run(last, self.now()) {
            Some(run_time) => Ok(vec![self.build_run(run_time)?]),
            None => Ok(Vec::new()),
        }
    }

    /// Build a JobRun for `run_time`, expanding every command template.
    ///
    /// Nothing is recorded if any ActionRun fails to build.
    pub fn build_run(&mut self, run_time: DateTime<Utc>) -> Result<RunId> {
        let run_num = self.run_counter + 1;
        let id = format!("{}.{}", self.name, run_num);

        let mut runs = Vec::with_capacity(self.actions.len());
        for name in self.graph.topo_order() {
            let action = self.actions.get(name).ok_or_else(|| {
                DagcronError::ConfigError(format!("action '{name}' missing from job '{}'", self.name))
            })?;
            runs.push(self.build_action_run(action, &id, run_time)?);
        }

        let job_run = JobRun {
            id: id.clone(),
            run_num,
            job: self.name.clone(),
            run_time,
            runs,
            start_requested: false,
        };

        let pos = self
            .runs
            .iter()
            .position(|r| r.run_time <= run_time)
            .unwrap_or(self.runs.len());
        self.runs.insert(pos, job_run);
        self.run_counter = run_num;

        info!(job = %self.name, run = %id, %run_time, "built job run");
        Ok(id)
    }

    fn build_action_run(
        &self,
        action: &Action,
        job_run_id: &str,
        run_time: DateTime<Utc>,
    ) -> Result<ActionRun> {
        let pool = action.node_pool.as_ref().unwrap_or(&self.node_pool);
        let node = pool.next_node()?.to_string();
        let id = format!("{}.{}", job_run_id, action.name);

        let ctx = TemplateContext {
            action_name: &action.name,
            job_name: &self.name,
            run_id: &id,
            node: &node,
            run_time,
        };
        let command = template::expand(&action.command, &ctx)?;

        let required_runs: Vec<RunId> = self
            .graph
            .dependencies_of(&action.name)
            .iter()
            .map(|dep| format!("{job_run_id}.{dep}"))
            .collect();

        let (stdout_path, stderr_path) = match &self.output_dir {
            Some(dir) => (
                Some(dir.join(format!("{id}.stdout"))),
                Some(dir.join(format!("{id}.stderr"))),
            ),
            None => (None, None),
        };

        Ok(ActionRun {
            blocked_on_dependency: !required_runs.is_empty(),
            id,
            action: action.name.clone(),
            job_run: job_run_id.to_string(),
            command,
            node,
            required_runs,
            stdout_path,
            stderr_path,
            state: ActionRunState::Scheduled,
            start_time: None,
            end_time: None,
            exit_status: None,
        })
    }
}
