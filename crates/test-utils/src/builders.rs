use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use dagcron::clock::{Clock, ManualClock};
use dagcron::dag::{Action, Job};
use dagcron::exec::NodePool;
use dagcron::schedule::Scheduler;
use dagcron::types::QueueingPolicy;

/// A manual clock frozen at the given UTC instant.
pub fn frozen_clock(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(utc(y, mo, d, h, mi, s)))
}

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s)
        .single()
        .expect("valid test timestamp")
}

/// Builder for `Job` to simplify test setup.
///
/// Defaults: one node `"node1"`, a frozen clock at 2024-03-15 12:00:00 UTC,
/// no scheduler, allow-queue.
pub struct JobBuilder {
    name: String,
    actions: Vec<Action>,
    nodes: Vec<String>,
    clock: Arc<dyn Clock>,
    scheduler: Option<Scheduler>,
    queueing: QueueingPolicy,
    output_dir: Option<PathBuf>,
}

impl JobBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            actions: Vec::new(),
            nodes: vec!["node1".to_string()],
            clock: frozen_clock(2024, 3, 15, 12, 0, 0),
            scheduler: None,
            queueing: QueueingPolicy::AllowQueue,
            output_dir: None,
        }
    }

    /// Add an action with no requirements.
    pub fn action(mut self, name: &str, command: &str) -> Self {
        self.actions.push(Action::new(name, command));
        self
    }

    /// Add an action requiring every action in `requires`.
    pub fn action_after(mut self, name: &str, command: &str, requires: &[&str]) -> Self {
        let mut action = Action::new(name, command);
        for dep in requires {
            action = action.requires(*dep);
        }
        self.actions.push(action);
        self
    }

    pub fn nodes(mut self, nodes: &[&str]) -> Self {
        self.nodes = nodes.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn queueing(mut self, queueing: QueueingPolicy) -> Self {
        self.queueing = queueing;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn try_build(self) -> dagcron::errors::Result<Job> {
        let pool = Arc::new(NodePool::new(format!("{}-pool", self.name), self.nodes));
        let mut job = Job::new(self.name, self.actions, pool, self.clock)?.with_queueing(self.queueing);
        if let Some(scheduler) = self.scheduler {
            job = job.with_scheduler(scheduler);
        }
        if let Some(dir) = self.output_dir {
            job = job.with_output_dir(dir);
        }
        Ok(job)
    }

    pub fn build(self) -> Job {
        self.try_build().expect("Failed to build valid job from builder")
    }
}
