// tests/config_error_handling.rs

mod common;
use crate::common::{frozen_clock, init_tracing, TestResult};

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::NamedTempFile;

use dagcron::config::{build_jobs, load_and_validate, parse_config};
use dagcron::errors::DagcronError;
use dagcron::schedule::Scheduler;
use dagcron::types::{QueueingPolicy, TransportKind};

const FULL: &str = r#"
[config]
poll_interval_ms = 250
output_dir = "/srv/dagcron/out"
transport = "local"

[node_pool.batch]
nodes = ["batch1", "batch2"]

[job.nightly]
node_pool = "batch"
schedule = "daily 02:00"
queueing = "cancel-new"

[job.nightly.action.extract]
command = "extract %(shortdate-1)s"

[job.nightly.action.load]
command = "load %(runid)s"
requires = ["extract"]
node = "warehouse"

[job.ping]
node = "gateway"
schedule = "interval 30s"
output_dir = "/tmp/ping"

[job.ping.action.check]
command = "ping -c1 example.org"
"#;

fn config_error(toml: &str) -> String {
    match parse_config(toml) {
        Err(DagcronError::ConfigError(msg)) => msg,
        Err(e) => panic!("expected ConfigError, got: {e:?}"),
        Ok(_) => panic!("expected error, got Ok"),
    }
}

#[test]
fn full_config_loads_from_file() -> TestResult {
    init_tracing();
    let mut file = NamedTempFile::new()?;
    write!(file, "{FULL}")?;

    let cfg = load_and_validate(file.path())?;
    assert_eq!(cfg.config.poll_interval_ms, 250);
    assert_eq!(cfg.config.transport, TransportKind::Local);
    assert_eq!(cfg.job["nightly"].queueing, QueueingPolicy::CancelNew);
    assert_eq!(cfg.job["ping"].queueing, QueueingPolicy::AllowQueue);
    assert_eq!(
        cfg.schedule_of("ping"),
        Some(&Scheduler::Interval {
            every: Duration::from_secs(30)
        })
    );
    Ok(())
}

#[test]
fn defaults_apply_to_missing_config_section() -> TestResult {
    let cfg = parse_config(
        r#"
[job.a]
node = "h"
[job.a.action.x]
command = "true"
"#,
    )?;
    assert_eq!(cfg.config.poll_interval_ms, 1000);
    assert_eq!(cfg.config.transport, TransportKind::Ssh);
    assert!(cfg.config.state_file.is_none());
    assert!(cfg.schedule_of("a").is_none());
    Ok(())
}

#[test]
fn jobs_are_built_with_placement_and_output() -> TestResult {
    init_tracing();
    let cfg = parse_config(FULL)?;
    let mut jobs = build_jobs(&cfg, frozen_clock(2024, 3, 15, 12, 0, 0))?;
    assert_eq!(jobs.len(), 2);

    let nightly = jobs
        .iter_mut()
        .find(|j| j.name == "nightly")
        .expect("nightly job");
    assert_eq!(nightly.queueing, QueueingPolicy::CancelNew);
    assert_eq!(nightly.output_dir, Some(PathBuf::from("/srv/dagcron/out")));
    let id = nightly.build_run(nightly.now())?;
    let run = nightly.run(&id).expect("built run");
    let extract = run.action_run("extract").expect("extract");
    let load = run.action_run("load").expect("load");
    assert_eq!(extract.node, "batch1");
    assert_eq!(extract.command, "extract 2024-03-14");
    assert_eq!(load.node, "warehouse");
    assert_eq!(load.command, "load nightly.1.load");

    let ping = jobs.iter().find(|j| j.name == "ping").expect("ping job");
    assert_eq!(ping.output_dir, Some(PathBuf::from("/tmp/ping")));
    assert_eq!(ping.node_pool.nodes(), ["gateway".to_string()]);
    Ok(())
}

#[test]
fn action_cycle_returns_dependency_deadlock() {
    let result = parse_config(
        r#"
[job.j]
node = "h"

[job.j.action.A]
command = "echo A"
requires = ["B"]

[job.j.action.B]
command = "echo B"
requires = ["A"]
"#,
    );

    match result {
        Err(DagcronError::DependencyDeadlock(msg)) => {
            assert!(msg.contains("cycle detected"));
            assert!(msg.contains('A') || msg.contains('B'));
        }
        Err(e) => panic!("Expected DependencyDeadlock, got: {e:?}"),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn unknown_requirement_returns_config_error() {
    let msg = config_error(
        r#"
[job.j]
node = "h"
[job.j.action.A]
command = "echo A"
requires = ["NonExistent"]
"#,
    );
    assert!(msg.contains("unknown action"));
    assert!(msg.contains("NonExistent"));
}

#[test]
fn unknown_node_pool_returns_config_error() {
    let msg = config_error(
        r#"
[job.j]
node_pool = "missing"
[job.j.action.A]
command = "echo A"
"#,
    );
    assert!(msg.contains("unknown node pool 'missing'"));
}

#[test]
fn empty_node_pool_is_rejected() {
    let msg = config_error(
        r#"
[node_pool.none]
nodes = []
[job.j]
node_pool = "none"
[job.j.action.A]
command = "echo A"
"#,
    );
    assert!(msg.contains("at least one node"));
}

#[test]
fn unplaced_action_is_rejected() {
    let msg = config_error(
        r#"
[job.j]
[job.j.action.A]
command = "echo A"
"#,
    );
    assert!(msg.contains("has no node"));
}

#[test]
fn node_and_pool_together_are_rejected() {
    let msg = config_error(
        r#"
[node_pool.p]
nodes = ["a"]
[job.j]
node = "h"
node_pool = "p"
[job.j.action.A]
command = "echo A"
"#,
    );
    assert!(msg.contains("both"));
}

#[test]
fn bad_schedule_is_rejected() {
    let msg = config_error(
        r#"
[job.j]
node = "h"
schedule = "every tuesday"
[job.j.action.A]
command = "echo A"
"#,
    );
    assert!(msg.contains("invalid schedule"));
}

#[test]
fn config_without_jobs_is_rejected() {
    let msg = config_error("[config]\npoll_interval_ms = 10\n");
    assert!(msg.contains("at least one [job.<name>]"));
}

#[test]
fn zero_poll_interval_is_rejected() {
    let msg = config_error(
        r#"
[config]
poll_interval_ms = 0
[job.j]
node = "h"
[job.j.action.A]
command = "echo A"
"#,
    );
    assert!(msg.contains("poll_interval_ms"));
}

#[test]
fn unknown_keys_and_policies_are_toml_errors() {
    for bad in [
        "[job.j]\nnode = \"h\"\ncolour = \"red\"\n[job.j.action.A]\ncommand = \"x\"\n",
        "[job.j]\nnode = \"h\"\nqueueing = \"sometimes\"\n[job.j.action.A]\ncommand = \"x\"\n",
    ] {
        assert!(
            matches!(parse_config(bad), Err(DagcronError::TomlError(_))),
            "{bad:?} should fail to deserialize"
        );
    }
}

#[test]
fn missing_file_is_an_error() {
    let result = load_and_validate("/definitely/not/here/Dagcron.toml");
    assert!(result.is_err());
}
