// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::schedule::Scheduler;
use crate::types::{QueueingPolicy, TransportKind};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// poll_interval_ms = 1000
/// output_dir = "runs"
/// transport = "ssh"
///
/// [node_pool.batch]
/// nodes = ["batch1", "batch2"]
///
/// [job.nightly]
/// node_pool = "batch"
/// schedule = "daily 02:00"
///
/// [job.nightly.action.extract]
/// command = "extract --day %(shortdate-1)s"
///
/// [job.nightly.action.load]
/// command = "load %(runid)s"
/// requires = ["extract"]
/// ```
///
/// This is the unvalidated shape; use [`ConfigFile`] (via `TryFrom`) in the
/// rest of the application.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Named pools from `[node_pool.<name>]`.
    #[serde(default)]
    pub node_pool: BTreeMap<String, NodePoolConfig>,

    /// Jobs from `[job.<name>]`.
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// Validated configuration.
///
/// Only constructible through `TryFrom<RawConfigFile>`, so holding one means
/// every pool reference resolves, every schedule parses and every job's
/// action graph is acyclic.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub node_pool: BTreeMap<String, NodePoolConfig>,
    pub job: BTreeMap<String, JobConfig>,
    /// Parsed `schedule` strings, keyed by job name.
    pub(crate) schedules: BTreeMap<String, Scheduler>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        raw: RawConfigFile,
        schedules: BTreeMap<String, Scheduler>,
    ) -> Self {
        Self {
            config: raw.config,
            node_pool: raw.node_pool,
            job: raw.job,
            schedules,
        }
    }

    /// Parsed scheduler of `job`, if it has one.
    pub fn schedule_of(&self, job: &str) -> Option<&Scheduler> {
        self.schedules.get(job)
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// How often schedules are polled.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Directory receiving `<action run id>.stdout` / `.stderr` files.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    #[serde(default)]
    pub transport: TransportKind,

    /// Append-only JSON-lines file of job run snapshots.
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    /// Where OpenSSH control sockets live.
    #[serde(default = "default_ssh_control_dir")]
    pub ssh_control_dir: PathBuf,

    /// Extra arguments passed to every `ssh` invocation.
    #[serde(default)]
    pub ssh_args: Vec<String>,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_ssh_control_dir() -> PathBuf {
    std::env::temp_dir().join("dagcron-ssh")
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            output_dir: None,
            transport: TransportKind::default(),
            state_file: None,
            ssh_control_dir: default_ssh_control_dir(),
            ssh_args: Vec::new(),
        }
    }
}

/// `[node_pool.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodePoolConfig {
    pub nodes: Vec<String>,
}

/// `[job.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    /// Single host to run on. Mutually exclusive with `node_pool`.
    #[serde(default)]
    pub node: Option<String>,

    /// Named pool to run on. Mutually exclusive with `node`.
    #[serde(default)]
    pub node_pool: Option<String>,

    /// `"constant"`, `"daily"`, `"daily HH:MM"` or `"interval <duration>"`.
    /// Jobs without a schedule only run when triggered.
    #[serde(default)]
    pub schedule: Option<String>,

    #[serde(default)]
    pub queueing: QueueingPolicy,

    /// Overrides `[config].output_dir` for this job.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    #[serde(default)]
    pub action: BTreeMap<String, ActionConfig>,
}

/// `[job.<name>.action.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionConfig {
    /// Command template.
    pub command: String,

    /// Actions of the same job that must succeed first.
    #[serde(default)]
    pub requires: Vec<String>,

    /// Overrides the job's placement with a single host.
    #[serde(default)]
    pub node: Option<String>,

    /// Overrides the job's placement with a named pool.
    #[serde(default)]
    pub node_pool: Option<String>,
}
