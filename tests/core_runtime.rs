// tests/core_runtime.rs

mod common;
use crate::common::{frozen_clock, init_tracing, utc, JobBuilder, TestResult};

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveTime};

use dagcron::dag::{ActionRunState, ExecRequest, JobRun, JobRunState, StateChange};
use dagcron::engine::{CoreCommand, CoreRuntime, CoreStep, RunObserver, RuntimeEvent, RuntimeOptions};
use dagcron::errors::{ConnectionError, DagcronError};
use dagcron::schedule::Scheduler;

fn dispatched(step: &CoreStep) -> Vec<ExecRequest> {
    step.commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::Dispatch(reqs) => Some(reqs.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn persisted(step: &CoreStep) -> Vec<String> {
    step.commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::Persist(snaps) => Some(snaps.iter().map(|s| s.completed.clone()).collect::<Vec<_>>()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn exited(run: &str, status: i32) -> RuntimeEvent {
    RuntimeEvent::ActionExited {
        run: run.to_string(),
        status,
    }
}

#[derive(Default, Clone)]
struct Recorder {
    changes: Arc<Mutex<Vec<(String, String, ActionRunState)>>>,
    completed: Arc<Mutex<Vec<(String, JobRunState)>>>,
}

impl RunObserver for Recorder {
    fn on_state_change(&mut self, job: &str, change: &StateChange) {
        self.changes
            .lock()
            .unwrap()
            .push((job.to_string(), change.run.clone(), change.to));
    }

    fn on_complete(&mut self, job_run: &JobRun) {
        self.completed
            .lock()
            .unwrap()
            .push((job_run.id.clone(), job_run.state()));
    }
}

#[test]
fn polling_starts_due_runs_and_schedules_the_next() -> TestResult {
    init_tracing();
    let clock = frozen_clock(2024, 3, 15, 12, 0, 0);
    let job = JobBuilder::new("poll")
        .action("check", "check %(unixtime)s")
        .clock(clock.clone())
        .scheduler(Scheduler::Interval {
            every: StdDuration::from_secs(60),
        })
        .build();
    let mut core = CoreRuntime::new(vec![job], clock.clone(), RuntimeOptions::default())?;

    let step = core.start();
    assert!(step.keep_running);
    let reqs = dispatched(&step);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].run, "poll.1.check");
    assert_eq!(reqs[0].command, format!("check {}", clock_ts(12, 0)));

    assert_eq!(core.job("poll").map(|j| j.runs().count()), Some(1));

    // The following tick builds poll.2 for 12:01, which is not due yet.
    clock.advance(Duration::seconds(30));
    assert!(dispatched(&core.step(RuntimeEvent::Tick)).is_empty());
    let job = core.job("poll").expect("job");
    assert_eq!(job.run("poll.2").map(|r| r.run_time), Some(utc(2024, 3, 15, 12, 1, 0)));

    // At 12:01 poll.2 is due, but poll.1 still runs, so it queues.
    clock.advance(Duration::seconds(30));
    assert!(dispatched(&core.step(RuntimeEvent::Tick)).is_empty());
    let job = core.job("poll").expect("job");
    assert_eq!(
        job.action_run("poll.2.check").map(|r| r.state()),
        Some(ActionRunState::Queued)
    );
    assert!(job.run("poll.3").is_some());

    let step = core.step(exited("poll.1.check", 0));
    let reqs = dispatched(&step);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].run, "poll.2.check");
    assert_eq!(reqs[0].command, format!("check {}", clock_ts(12, 1)));
    Ok(())
}

fn clock_ts(h: u32, m: u32) -> i64 {
    utc(2024, 3, 15, h, m, 0).timestamp()
}

#[test]
fn exits_drive_dependents_and_persist_snapshots() -> TestResult {
    init_tracing();
    let job = JobBuilder::new("etl")
        .action("extract", "extract")
        .action_after("load", "load", &["extract"])
        .build();
    let mut core = CoreRuntime::new(vec![job], frozen_clock(2024, 3, 15, 12, 0, 0), RuntimeOptions::default())?;
    let recorder = Recorder::default();
    core.register_observer(Box::new(recorder.clone()));

    let (summary, step) = core.trigger("etl")?;
    assert_eq!(summary.id, "etl.1");
    assert_eq!(summary.state, JobRunState::Running);
    assert_eq!(dispatched(&step).len(), 1);

    let step = core.step(exited("etl.1.extract", 0));
    assert_eq!(persisted(&step), vec!["etl.1.extract"]);
    let reqs = dispatched(&step);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].run, "etl.1.load");

    let step = core.step(exited("etl.1.load", 0));
    assert_eq!(persisted(&step), vec!["etl.1.load"]);

    let changes = recorder.changes.lock().unwrap().clone();
    assert_eq!(
        changes,
        vec![
            ("etl".to_string(), "etl.1.extract".to_string(), ActionRunState::Running),
            ("etl".to_string(), "etl.1.extract".to_string(), ActionRunState::Succeeded),
            ("etl".to_string(), "etl.1.load".to_string(), ActionRunState::Running),
            ("etl".to_string(), "etl.1.load".to_string(), ActionRunState::Succeeded),
        ]
    );
    assert_eq!(
        recorder.completed.lock().unwrap().clone(),
        vec![("etl.1".to_string(), JobRunState::Succeeded)]
    );
    Ok(())
}

#[test]
fn connection_failure_becomes_unknown() -> TestResult {
    init_tracing();
    let job = JobBuilder::new("remote").action("a", "a").build();
    let mut core = CoreRuntime::new(vec![job], frozen_clock(2024, 3, 15, 12, 0, 0), RuntimeOptions::default())?;
    core.trigger("remote")?;

    let step = core.step(RuntimeEvent::ConnectionFailed {
        run: "remote.1.a".to_string(),
        error: ConnectionError {
            node: "node1".to_string(),
            reason: "no route to host".to_string(),
        },
    });
    assert_eq!(persisted(&step), vec!["remote.1.a"]);

    let runs = core.list_runs("remote")?;
    assert_eq!(runs[0].state, JobRunState::Unknown);
    assert_eq!(runs[0].actions[0].state, ActionRunState::Unknown);
    assert_eq!(runs[0].actions[0].exit_status, None);
    Ok(())
}

#[test]
fn cancel_routes_by_action_run_id() -> TestResult {
    init_tracing();
    let job = JobBuilder::new("long").action("sleep", "sleep 3600").build();
    let mut core = CoreRuntime::new(vec![job], frozen_clock(2024, 3, 15, 12, 0, 0), RuntimeOptions::default())?;
    core.trigger("long")?;

    let step = core.cancel("long.1.sleep")?;
    let kills: Vec<_> = step
        .commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::Kill(k) => Some(k.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(kills.len(), 1);
    assert_eq!(kills[0].run, "long.1.sleep");

    core.step(exited("long.1.sleep", -1));
    assert_eq!(core.list_runs("long")?[0].state, JobRunState::Failed);

    assert!(matches!(
        core.cancel("long.1.sleep"),
        Err(DagcronError::InvalidTransition { .. })
    ));
    assert!(matches!(
        core.cancel("nope.1.x"),
        Err(DagcronError::RunNotFound(_))
    ));
    Ok(())
}

#[test]
fn unknown_jobs_are_reported() -> TestResult {
    let job = JobBuilder::new("a").action("x", "x").build();
    let mut core = CoreRuntime::new(vec![job], frozen_clock(2024, 3, 15, 12, 0, 0), RuntimeOptions::default())?;

    assert!(matches!(core.trigger("b"), Err(DagcronError::JobNotFound(_))));
    assert!(matches!(core.list_runs("b"), Err(DagcronError::JobNotFound(_))));

    // Exit reports for runs nobody knows are ignored.
    let step = core.step(exited("b.1.x", 0));
    assert!(step.commands.is_empty());
    assert!(step.keep_running);
    Ok(())
}

#[test]
fn duplicate_job_names_are_rejected() {
    let jobs = vec![
        JobBuilder::new("same").action("x", "x").build(),
        JobBuilder::new("same").action("y", "y").build(),
    ];
    assert!(matches!(
        CoreRuntime::new(jobs, frozen_clock(2024, 3, 15, 12, 0, 0), RuntimeOptions::default()),
        Err(DagcronError::ConfigError(_))
    ));
}

fn once_jobs() -> Vec<dagcron::dag::Job> {
    vec![
        // No scheduler: only runs when triggered.
        JobBuilder::new("adhoc").action("x", "x").build(),
        // 03:00 has already passed at 12:00, so the next run is tomorrow.
        JobBuilder::new("nightly")
            .action("n", "n")
            .scheduler(Scheduler::Daily {
                at: NaiveTime::from_hms_opt(3, 0, 0).expect("valid time"),
            })
            .build(),
        JobBuilder::new("hourly")
            .action("y", "y")
            .action_after("z", "z", &["y"])
            .scheduler(Scheduler::Interval {
                every: StdDuration::from_secs(3600),
            })
            .build(),
    ]
}

fn once_options() -> RuntimeOptions {
    RuntimeOptions {
        exit_when_idle: true,
    }
}

#[test]
fn once_mode_starts_only_due_runs_and_exits_when_settled() -> TestResult {
    init_tracing();
    let clock = frozen_clock(2024, 3, 15, 12, 0, 0);
    let mut core = CoreRuntime::new(once_jobs(), clock.clone(), once_options())?;

    let step = core.start();
    assert!(step.keep_running);
    let runs: Vec<_> = dispatched(&step).into_iter().map(|r| r.run).collect();
    assert_eq!(runs, vec!["hourly.1.y"]);

    assert_eq!(core.job("adhoc").map(|j| j.runs().count()), Some(0));
    let nightly = core.job("nightly").expect("nightly job");
    assert!(nightly.runs().all(|r| !r.start_requested()));

    // Ticks never poll schedules in once mode, even once time moves on.
    clock.advance(Duration::hours(2));
    assert!(core.step(RuntimeEvent::Tick).commands.is_empty());
    assert_eq!(core.job("hourly").map(|j| j.runs().count()), Some(1));

    // A failed requirement stalls z; the core still exits.
    let step = core.step(exited("hourly.1.y", 1));
    assert!(!step.keep_running);
    assert!(matches!(step.commands.last(), Some(CoreCommand::RequestExit)));
    assert!(core.is_idle());
    Ok(())
}

#[test]
fn once_mode_with_nothing_due_exits_at_start() -> TestResult {
    init_tracing();
    let jobs: Vec<_> = once_jobs()
        .into_iter()
        .filter(|job| job.name != "hourly")
        .collect();
    let mut core = CoreRuntime::new(jobs, frozen_clock(2024, 3, 15, 12, 0, 0), once_options())?;

    let step = core.start();
    assert!(dispatched(&step).is_empty());
    assert!(!step.keep_running);
    assert!(matches!(step.commands.last(), Some(CoreCommand::RequestExit)));
    Ok(())
}

#[test]
fn startup_triggers_run_trigger_only_jobs() -> TestResult {
    init_tracing();
    let mut core = CoreRuntime::new(once_jobs(), frozen_clock(2024, 3, 15, 12, 0, 0), once_options())?;

    assert!(matches!(
        core.trigger_on_start("missing"),
        Err(DagcronError::JobNotFound(_))
    ));
    core.trigger_on_start("adhoc")?;

    let step = core.start();
    let mut runs: Vec<_> = dispatched(&step).into_iter().map(|r| r.run).collect();
    runs.sort();
    assert_eq!(runs, vec!["adhoc.1.x", "hourly.1.y"]);

    assert!(core.step(exited("adhoc.1.x", 0)).keep_running);
    core.step(exited("hourly.1.y", 0));
    let step = core.step(exited("hourly.1.z", 0));
    assert!(!step.keep_running);
    Ok(())
}

#[test]
fn shutdown_stops_the_loop() -> TestResult {
    let job = JobBuilder::new("a").action("x", "x").build();
    let mut core = CoreRuntime::new(vec![job], frozen_clock(2024, 3, 15, 12, 0, 0), RuntimeOptions::default())?;
    assert!(!core.step(RuntimeEvent::ShutdownRequested).keep_running);
    Ok(())
}
