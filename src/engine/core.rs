// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! owns every [`Job`] and consumes [`RuntimeEvent`]s, producing:
//! - updated job and run state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for reading
//! events from channels, talking to nodes and the run store, and handling
//! Ctrl+C. The core has no channels, no Tokio types, and performs no IO, so
//! it can be driven step by step in tests with a manual clock.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::dag::{Job, JobName, JobRun, RunId, StateChange, Transition};
use crate::engine::control::JobRunSummary;
use crate::engine::event_handlers::{
    handle_action_exited, handle_connection_failed, poll_job, snapshots_for, trigger_job,
    CoreCommand, CoreStep,
};
use crate::engine::{RuntimeEvent, RuntimeOptions};
use crate::errors::{DagcronError, Result};

/// Callbacks invoked synchronously on the control thread.
pub trait RunObserver: Send {
    /// An ActionRun changed state.
    fn on_state_change(&mut self, _job: &str, _change: &StateChange) {}

    /// Every ActionRun of a JobRun reached a terminal state.
    fn on_complete(&mut self, _job_run: &JobRun) {}
}

pub struct CoreRuntime {
    jobs: BTreeMap<JobName, Job>,
    /// JobRun and ActionRun ids to the owning job.
    run_index: HashMap<RunId, JobName>,
    observers: Vec<Box<dyn RunObserver>>,
    /// Jobs to trigger right after the first poll.
    startup_triggers: Vec<JobName>,
    options: RuntimeOptions,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CoreRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreRuntime")
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .field("observers", &self.observers.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl CoreRuntime {
    pub fn new(jobs: Vec<Job>, clock: Arc<dyn Clock>, options: RuntimeOptions) -> Result<Self> {
        let mut by_name = BTreeMap::new();
        let mut run_index = HashMap::new();

        for job in jobs {
            for job_run in job.runs() {
                index_job_run(&mut run_index, &job.name, job_run);
            }
            if by_name.contains_key(&job.name) {
                return Err(DagcronError::ConfigError(format!(
                    "job '{}' defined more than once",
                    job.name
                )));
            }
            by_name.insert(job.name.clone(), job);
        }

        Ok(Self {
            jobs: by_name,
            run_index,
            observers: Vec::new(),
            startup_triggers: Vec::new(),
            options,
            clock,
        })
    }

    pub fn register_observer(&mut self, observer: Box<dyn RunObserver>) {
        self.observers.push(observer);
    }

    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.get(name)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Every started JobRun is done or stalled behind a failed requirement.
    pub fn is_idle(&self) -> bool {
        self.jobs
            .values()
            .flat_map(|job| job.runs())
            .all(|run| !run.start_requested() || run.is_done() || run.is_stalled())
    }

    /// Trigger `job_name` as part of [`CoreRuntime::start`].
    ///
    /// Fails with `JobNotFound` for unknown jobs.
    pub fn trigger_on_start(&mut self, job_name: &str) -> Result<()> {
        if !self.jobs.contains_key(job_name) {
            return Err(DagcronError::JobNotFound(job_name.to_string()));
        }
        self.startup_triggers.push(job_name.to_string());
        Ok(())
    }

    /// First step after startup: poll schedules once, then run the startup
    /// triggers. In `--once` mode this is the only poll.
    pub fn start(&mut self) -> CoreStep {
        let mut commands = self.poll_commands();
        for name in std::mem::take(&mut self.startup_triggers) {
            match self.trigger_inner(&name) {
                Ok((_, step_commands)) => commands.extend(step_commands),
                Err(err) => error!(job = %name, error = %err, "startup trigger failed"),
            }
        }
        self.finish_step(commands)
    }

    /// Handle a single runtime event, updating state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::Tick => {
                if self.options.exit_when_idle {
                    self.finish_step(Vec::new())
                } else {
                    self.poll()
                }
            }
            RuntimeEvent::ActionExited { run, status } => {
                let commands = self.with_job_of(&run, |job| handle_action_exited(job, &run, status));
                self.finish_step(commands)
            }
            RuntimeEvent::ConnectionFailed { run, error } => {
                let commands =
                    self.with_job_of(&run, |job| handle_connection_failed(job, &run, &error));
                self.finish_step(commands)
            }
            RuntimeEvent::Control(request) => {
                warn!(?request, "control request reached the core directly; dropping");
                CoreStep::idle()
            }
            RuntimeEvent::ShutdownRequested => CoreStep {
                commands: Vec::new(),
                keep_running: false,
            },
        }
    }

    /// Start due runs and build upcoming ones for every job.
    pub fn poll(&mut self) -> CoreStep {
        let commands = self.poll_commands();
        self.finish_step(commands)
    }

    fn poll_commands(&mut self) -> Vec<CoreCommand> {
        let now = self.clock.now();
        let mut commands = Vec::new();
        let names: Vec<JobName> = self.jobs.keys().cloned().collect();

        for name in names {
            let Some(job) = self.jobs.get_mut(&name) else {
                continue;
            };
            let (built, tr) = poll_job(job, now);
            for id in built {
                self.index_run(&name, &id);
            }
            commands.extend(self.apply(&name, tr));
        }
        commands
    }

    /// Build and start a run of `job` now.
    pub fn trigger(&mut self, job_name: &str) -> Result<(JobRunSummary, CoreStep)> {
        let (summary, commands) = self.trigger_inner(job_name)?;
        Ok((summary, self.finish_step(commands)))
    }

    fn trigger_inner(&mut self, job_name: &str) -> Result<(JobRunSummary, Vec<CoreCommand>)> {
        let job = self
            .jobs
            .get_mut(job_name)
            .ok_or_else(|| DagcronError::JobNotFound(job_name.to_string()))?;

        let (id, tr) = trigger_job(job)?;
        info!(job = %job_name, run = %id, "manual trigger");
        self.index_run(job_name, &id);

        let commands = self.apply(job_name, tr);
        let summary = self
            .jobs
            .get(job_name)
            .and_then(|job| job.run(&id))
            .map(JobRunSummary::from)
            .ok_or_else(|| DagcronError::RunNotFound(id.clone()))?;

        Ok((summary, commands))
    }

    /// Cancel an ActionRun by id.
    pub fn cancel(&mut self, run: &str) -> Result<CoreStep> {
        let job_name = self
            .run_index
            .get(run)
            .cloned()
            .ok_or_else(|| DagcronError::RunNotFound(run.to_string()))?;
        let job = self
            .jobs
            .get_mut(&job_name)
            .ok_or_else(|| DagcronError::JobNotFound(job_name.clone()))?;

        let tr = job.cancel(run)?;
        let commands = self.apply(&job_name, tr);
        Ok(self.finish_step(commands))
    }

    /// Summaries of a job's runs, newest first.
    pub fn list_runs(&self, job_name: &str) -> Result<Vec<JobRunSummary>> {
        let job = self
            .jobs
            .get(job_name)
            .ok_or_else(|| DagcronError::JobNotFound(job_name.to_string()))?;
        Ok(job.runs().map(JobRunSummary::from).collect())
    }

    fn with_job_of<F>(&mut self, run: &str, f: F) -> Vec<CoreCommand>
    where
        F: FnOnce(&mut Job) -> Transition,
    {
        let Some(job_name) = self.run_index.get(run).cloned() else {
            warn!(run = %run, "event for unknown run; ignoring");
            return Vec::new();
        };
        let Some(job) = self.jobs.get_mut(&job_name) else {
            return Vec::new();
        };
        let tr = f(job);
        self.apply(&job_name, tr)
    }

    /// Notify observers and turn a transition into shell commands.
    fn apply(&mut self, job_name: &str, tr: Transition) -> Vec<CoreCommand> {
        let Some(job) = self.jobs.get(job_name) else {
            return Vec::new();
        };

        for change in &tr.changes {
            for observer in self.observers.iter_mut() {
                observer.on_state_change(job_name, change);
            }
        }
        for id in &tr.job_runs_finished {
            if let Some(job_run) = job.run(id) {
                for observer in self.observers.iter_mut() {
                    observer.on_complete(job_run);
                }
            }
        }

        let mut commands = Vec::new();
        let snapshots = snapshots_for(job, &tr, self.clock.now());
        if !snapshots.is_empty() {
            commands.push(CoreCommand::Persist(snapshots));
        }
        if !tr.dispatch.is_empty() {
            commands.push(CoreCommand::Dispatch(tr.dispatch));
        }
        if !tr.kill.is_empty() {
            commands.push(CoreCommand::Kill(tr.kill));
        }
        commands
    }

    fn finish_step(&self, mut commands: Vec<CoreCommand>) -> CoreStep {
        let mut keep_running = true;
        if self.options.exit_when_idle && self.is_idle() {
            for run in self.jobs.values().flat_map(|job| job.runs()) {
                if run.is_stalled() {
                    warn!(job = %run.job, run = %run.id, "job run left blocked behind a failed requirement");
                }
            }
            debug!("all runs settled; requesting exit");
            keep_running = false;
            commands.push(CoreCommand::RequestExit);
        }
        CoreStep {
            commands,
            keep_running,
        }
    }

    fn index_run(&mut self, job_name: &str, job_run_id: &str) {
        if let Some(job_run) = self.jobs.get(job_name).and_then(|job| job.run(job_run_id)) {
            index_job_run(&mut self.run_index, job_name, job_run);
        }
    }
}

fn index_job_run(index: &mut HashMap<RunId, JobName>, job_name: &str, job_run: &JobRun) {
    index.insert(job_run.id.clone(), job_name.to_string());
    for action_run in &job_run.runs {
        index.insert(action_run.id.clone(), job_name.to_string());
    }
}
