// src/config/validate.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, JobConfig, RawConfigFile};
use crate::errors::{DagcronError, Result};
use crate::schedule::Scheduler;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = DagcronError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let schedules = validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw, schedules))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<BTreeMap<String, Scheduler>> {
    ensure_has_jobs(cfg)?;
    validate_global_config(cfg)?;
    validate_node_pools(cfg)?;

    let mut schedules = BTreeMap::new();
    for (name, job) in cfg.job.iter() {
        validate_job_placement(cfg, name, job)?;
        validate_action_requirements(name, job)?;
        validate_action_dag(name, job)?;
        if let Some(schedule) = parse_schedule(name, job)? {
            schedules.insert(name.clone(), schedule);
        }
    }
    Ok(schedules)
}

fn ensure_has_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(DagcronError::ConfigError(
            "config must contain at least one [job.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.poll_interval_ms == 0 {
        return Err(DagcronError::ConfigError(
            "[config].poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_node_pools(cfg: &RawConfigFile) -> Result<()> {
    for (name, pool) in cfg.node_pool.iter() {
        if pool.nodes.is_empty() {
            return Err(DagcronError::ConfigError(format!(
                "node pool '{name}' must list at least one node"
            )));
        }
        if let Some(blank) = pool.nodes.iter().find(|n| n.trim().is_empty()) {
            return Err(DagcronError::ConfigError(format!(
                "node pool '{name}' contains an empty hostname ({blank:?})"
            )));
        }
    }
    Ok(())
}

fn check_placement(
    cfg: &RawConfigFile,
    what: &str,
    node: Option<&String>,
    node_pool: Option<&String>,
) -> Result<()> {
    if node.is_some() && node_pool.is_some() {
        return Err(DagcronError::ConfigError(format!(
            "{what} sets both `node` and `node_pool`"
        )));
    }
    if let Some(pool) = node_pool {
        if !cfg.node_pool.contains_key(pool) {
            return Err(DagcronError::ConfigError(format!(
                "{what} references unknown node pool '{pool}'"
            )));
        }
    }
    if let Some(node) = node {
        if node.trim().is_empty() {
            return Err(DagcronError::ConfigError(format!(
                "{what} has an empty `node`"
            )));
        }
    }
    Ok(())
}

fn validate_job_placement(cfg: &RawConfigFile, name: &str, job: &JobConfig) -> Result<()> {
    if job.action.is_empty() {
        return Err(DagcronError::ConfigError(format!(
            "job '{name}' must contain at least one [job.{name}.action.<name>] section"
        )));
    }

    let job_what = format!("job '{name}'");
    check_placement(cfg, &job_what, job.node.as_ref(), job.node_pool.as_ref())?;
    let job_placed = job.node.is_some() || job.node_pool.is_some();

    for (action_name, action) in job.action.iter() {
        let what = format!("action '{action_name}' of job '{name}'");
        check_placement(cfg, &what, action.node.as_ref(), action.node_pool.as_ref())?;
        if !job_placed && action.node.is_none() && action.node_pool.is_none() {
            return Err(DagcronError::ConfigError(format!(
                "{what} has no node: set `node` or `node_pool` on the job or the action"
            )));
        }
    }
    Ok(())
}

fn validate_action_requirements(name: &str, job: &JobConfig) -> Result<()> {
    for (action_name, action) in job.action.iter() {
        for dep in action.requires.iter() {
            if dep == action_name {
                return Err(DagcronError::DependencyDeadlock(format!(
                    "action '{action_name}' of job '{name}' requires itself"
                )));
            }
            if !job.action.contains_key(dep) {
                return Err(DagcronError::ConfigError(format!(
                    "action '{action_name}' of job '{name}' requires unknown action '{dep}'"
                )));
            }
        }
    }
    Ok(())
}

fn validate_action_dag(name: &str, job: &JobConfig) -> Result<()> {
    // Edge direction: required -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for action_name in job.action.keys() {
        graph.add_node(action_name.as_str());
    }
    for (action_name, action) in job.action.iter() {
        for dep in action.requires.iter() {
            graph.add_edge(dep.as_str(), action_name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(DagcronError::DependencyDeadlock(format!(
            "cycle detected in job '{}' involving action '{}'",
            name,
            cycle.node_id()
        ))),
    }
}

fn parse_schedule(name: &str, job: &JobConfig) -> Result<Option<Scheduler>> {
    let Some(raw) = job.schedule.as_deref() else {
        return Ok(None);
    };
    raw.parse::<Scheduler>().map(Some).map_err(|e| {
        DagcronError::ConfigError(format!("job '{name}' has an invalid schedule: {e}"))
    })
}
