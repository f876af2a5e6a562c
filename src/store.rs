// src/store.rs

//! Persistence of run history.
//!
//! The runtime hands a [`JobRunSnapshot`] to the configured [`RunStore`] each
//! time an ActionRun reaches a terminal state, exactly once per transition.

use std::fmt::Debug;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::{JobRun, JobRunState, RunId};
use crate::errors::Result;

/// State of a JobRun at the moment one of its ActionRuns finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunSnapshot {
    /// The ActionRun whose terminal transition produced this snapshot.
    pub completed: RunId,
    pub state: JobRunState,
    pub saved_at: DateTime<Utc>,
    pub job_run: JobRun,
}

impl JobRunSnapshot {
    pub fn new(completed: RunId, job_run: &JobRun, saved_at: DateTime<Utc>) -> Self {
        Self {
            completed,
            state: job_run.state(),
            saved_at,
            job_run: job_run.clone(),
        }
    }
}

pub trait RunStore: Send + Debug {
    fn save(&mut self, snapshot: &JobRunSnapshot) -> Result<()>;
}

/// Keeps snapshots in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryRunStore {
    saved: Arc<Mutex<Vec<JobRunSnapshot>>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<JobRunSnapshot> {
        self.saved
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl RunStore for MemoryRunStore {
    fn save(&mut self, snapshot: &JobRunSnapshot) -> Result<()> {
        let mut guard = self
            .saved
            .lock()
            .map_err(|_| anyhow::anyhow!("memory run store lock poisoned"))?;
        guard.push(snapshot.clone());
        Ok(())
    }
}

/// Appends one JSON document per snapshot to a file.
#[derive(Debug, Clone)]
pub struct JsonlRunStore {
    path: PathBuf,
}

impl JsonlRunStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read back every snapshot stored so far.
    pub fn load(&self) -> Result<Vec<JobRunSnapshot>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        let mut snapshots = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let snapshot: JobRunSnapshot = serde_json::from_str(line)
                .with_context(|| format!("parsing {:?} line {}", self.path, idx + 1))?;
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }
}

impl RunStore for JsonlRunStore {
    fn save(&mut self, snapshot: &JobRunSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating dir {:?}", parent))?;
            }
        }
        let mut line = serde_json::to_vec(snapshot).context("serializing snapshot")?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening run store {:?}", self.path))?;
        file.write_all(&line)
            .with_context(|| format!("writing run store {:?}", self.path))?;
        Ok(())
    }
}
