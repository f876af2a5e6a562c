// src/config/build.rs

//! Turn a validated [`ConfigFile`] into runnable [`Job`]s.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::config::model::ConfigFile;
use crate::dag::{Action, Job};
use crate::errors::{DagcronError, Result};
use crate::exec::NodePool;

/// Build every configured job.
///
/// Named pools are shared, so two jobs on the same pool take turns on its
/// round-robin cursor.
pub fn build_jobs(cfg: &ConfigFile, clock: Arc<dyn Clock>) -> Result<Vec<Job>> {
    let pools: BTreeMap<&str, Arc<NodePool>> = cfg
        .node_pool
        .iter()
        .map(|(name, pool)| {
            (
                name.as_str(),
                Arc::new(NodePool::new(name.clone(), pool.nodes.clone())),
            )
        })
        .collect();

    let resolve = |node: Option<&String>, pool: Option<&String>| -> Result<Option<Arc<NodePool>>> {
        match (node, pool) {
            (Some(host), _) => Ok(Some(Arc::new(NodePool::single(host.clone())))),
            (None, Some(pool)) => pools
                .get(pool.as_str())
                .cloned()
                .map(Some)
                .ok_or_else(|| DagcronError::ConfigError(format!("unknown node pool '{pool}'"))),
            (None, None) => Ok(None),
        }
    };

    let mut jobs = Vec::with_capacity(cfg.job.len());
    for (name, job_cfg) in cfg.job.iter() {
        let mut actions = Vec::with_capacity(job_cfg.action.len());
        for (action_name, action_cfg) in job_cfg.action.iter() {
            let mut action = Action::new(action_name.clone(), action_cfg.command.clone());
            for dep in action_cfg.requires.iter() {
                action = action.requires(dep.clone());
            }
            if let Some(pool) = resolve(action_cfg.node.as_ref(), action_cfg.node_pool.as_ref())? {
                action = action.with_node_pool(pool);
            }
            actions.push(action);
        }

        // Jobs placed only per action still need a pool; the first action's
        // placement stands in and is never consulted.
        let job_pool = match resolve(job_cfg.node.as_ref(), job_cfg.node_pool.as_ref())? {
            Some(pool) => pool,
            None => actions
                .iter()
                .find_map(|a| a.node_pool.clone())
                .ok_or_else(|| DagcronError::ConfigError(format!("job '{name}' has no node")))?,
        };

        let mut job = Job::new(name.clone(), actions, job_pool, Arc::clone(&clock))?
            .with_queueing(job_cfg.queueing);
        if let Some(scheduler) = cfg.schedule_of(name) {
            job = job.with_scheduler(scheduler.clone());
        }
        let output_dir: Option<PathBuf> = job_cfg
            .output_dir
            .clone()
            .or_else(|| cfg.config.output_dir.clone());
        if let Some(dir) = output_dir {
            job = job.with_output_dir(dir);
        }

        debug!(job = %name, pool = %job.node_pool.name(), "job built from config");
        jobs.push(job);
    }

    Ok(jobs)
}
