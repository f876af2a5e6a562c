// tests/action_run_state.rs

mod common;
use crate::common::{action_run, dispatched, frozen_clock, init_tracing, JobBuilder, TestResult};

use chrono::Duration;

use dagcron::clock::Clock;
use dagcron::dag::{ActionRunState, JobRunState};
use dagcron::errors::DagcronError;

#[test]
fn fresh_action_run_is_scheduled() -> TestResult {
    init_tracing();
    let mut job = JobBuilder::new("backup").action("dump", "pg_dump db").build();
    let id = job.build_run(job.now())?;

    assert_eq!(id, "backup.1");
    let run = action_run(&job, &id, "dump");
    assert!(run.is_scheduled());
    assert!(!run.is_queued());
    assert!(!run.is_done());
    assert_eq!(run.start_time(), None);
    assert_eq!(run.end_time(), None);
    assert_eq!(run.exit_status(), None);
    assert_eq!(job.run(&id).map(|r| r.state()), Some(JobRunState::Scheduled));
    Ok(())
}

#[test]
fn start_then_succeed_records_times_and_status() -> TestResult {
    init_tracing();
    let clock = frozen_clock(2024, 3, 15, 12, 0, 0);
    let mut job = JobBuilder::new("backup")
        .action("dump", "pg_dump db")
        .clock(clock.clone())
        .build();
    let id = job.build_run(clock.now())?;

    let tr = job.scheduled_start(&id)?;
    assert_eq!(dispatched(&tr), vec!["backup.1.dump".to_string()]);
    let run = action_run(&job, &id, "dump");
    assert!(run.is_running());
    assert_eq!(run.start_time(), Some(clock.now()));

    clock.advance(Duration::minutes(5));
    let tr = job.succeed("backup.1.dump")?;
    assert_eq!(tr.completed, vec!["backup.1.dump".to_string()]);
    assert_eq!(tr.job_runs_finished, vec!["backup.1".to_string()]);

    let run = action_run(&job, &id, "dump");
    assert!(run.is_success());
    assert!(run.is_done());
    assert_eq!(run.exit_status(), Some(0));
    assert_eq!(run.end_time(), Some(clock.now()));
    assert!(job.run(&id).is_some_and(|r| r.is_success()));
    Ok(())
}

#[test]
fn failure_keeps_exit_status() -> TestResult {
    init_tracing();
    let mut job = JobBuilder::new("backup").action("dump", "pg_dump db").build();
    let id = job.build_run(job.now())?;
    job.start("backup.1.dump")?;

    job.fail("backup.1.dump", 1)?;

    let run = action_run(&job, &id, "dump");
    assert!(run.is_failure());
    assert_eq!(run.exit_status(), Some(1));
    assert!(run.end_time().is_some());
    assert_eq!(job.run(&id).map(|r| r.state()), Some(JobRunState::Failed));
    Ok(())
}

#[test]
fn exit_status_maps_to_success_or_failure() -> TestResult {
    init_tracing();
    let mut job = JobBuilder::new("pair")
        .action("ok", "true")
        .action("bad", "false")
        .build();
    let id = job.build_run(job.now())?;
    job.scheduled_start(&id)?;

    job.handle_exit("pair.1.ok", 0)?;
    job.handle_exit("pair.1.bad", 3)?;

    assert!(action_run(&job, &id, "ok").is_success());
    let bad = action_run(&job, &id, "bad");
    assert!(bad.is_failure());
    assert_eq!(bad.exit_status(), Some(3));
    Ok(())
}

#[test]
fn finishing_a_run_that_never_started_is_rejected() -> TestResult {
    init_tracing();
    let mut job = JobBuilder::new("backup").action("dump", "pg_dump db").build();
    job.build_run(job.now())?;

    match job.succeed("backup.1.dump") {
        Err(DagcronError::InvalidTransition { run, reason }) => {
            assert_eq!(run, "backup.1.dump");
            assert!(reason.contains("scheduled"));
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
    assert!(action_run(&job, "backup.1", "dump").is_scheduled());
    Ok(())
}

#[test]
fn unknown_run_id_is_reported() {
    init_tracing();
    let mut job = JobBuilder::new("backup").action("dump", "pg_dump db").build();

    match job.start("backup.9.dump") {
        Err(DagcronError::RunNotFound(id)) => assert_eq!(id, "backup.9.dump"),
        other => panic!("expected RunNotFound, got {other:?}"),
    }
}

#[test]
fn cancelling_a_waiting_run_is_immediate() -> TestResult {
    init_tracing();
    let mut job = JobBuilder::new("backup").action("dump", "pg_dump db").build();
    let id = job.build_run(job.now())?;

    let tr = job.cancel("backup.1.dump")?;
    assert!(tr.kill.is_empty());
    assert_eq!(tr.job_runs_finished, vec![id.clone()]);

    let run = action_run(&job, &id, "dump");
    assert!(run.is_cancelled());
    assert_eq!(run.end_time(), None);
    assert_eq!(job.run(&id).map(|r| r.state()), Some(JobRunState::Cancelled));

    // Cancelled runs are never started later.
    let tr = job.scheduled_start(&id)?;
    assert!(tr.dispatch.is_empty());
    Ok(())
}

#[test]
fn cancelling_a_running_run_requests_a_kill() -> TestResult {
    init_tracing();
    let mut job = JobBuilder::new("backup")
        .action("dump", "pg_dump db")
        .nodes(&["db1"])
        .build();
    let id = job.build_run(job.now())?;
    job.scheduled_start(&id)?;

    let tr = job.cancel("backup.1.dump")?;
    assert_eq!(tr.kill.len(), 1);
    assert_eq!(tr.kill[0].run, "backup.1.dump");
    assert_eq!(tr.kill[0].node, "db1");
    assert!(tr.changes.is_empty());
    assert!(action_run(&job, &id, "dump").is_running());

    // The signalled process exits nonzero.
    job.handle_exit("backup.1.dump", -1)?;
    assert!(action_run(&job, &id, "dump").is_failure());
    Ok(())
}

#[test]
fn cancelling_a_finished_run_is_rejected() -> TestResult {
    init_tracing();
    let mut job = JobBuilder::new("backup").action("dump", "pg_dump db").build();
    let id = job.build_run(job.now())?;
    job.scheduled_start(&id)?;
    job.succeed("backup.1.dump")?;

    assert!(matches!(
        job.cancel("backup.1.dump"),
        Err(DagcronError::InvalidTransition { .. })
    ));
    assert!(action_run(&job, &id, "dump").is_success());
    Ok(())
}

#[test]
fn connection_failure_marks_run_unknown() -> TestResult {
    init_tracing();
    let mut job = JobBuilder::new("backup").action("dump", "pg_dump db").build();
    let id = job.build_run(job.now())?;
    job.scheduled_start(&id)?;

    let tr = job.mark_unknown("backup.1.dump")?;
    assert_eq!(tr.changes.len(), 1);
    assert_eq!(tr.changes[0].from, ActionRunState::Running);
    assert_eq!(tr.changes[0].to, ActionRunState::Unknown);

    let run = action_run(&job, &id, "dump");
    assert!(run.is_unknown());
    assert!(run.is_done());
    assert_eq!(run.exit_status(), None);
    assert!(run.end_time().is_some());
    assert_eq!(job.run(&id).map(|r| r.state()), Some(JobRunState::Unknown));
    Ok(())
}

#[test]
fn job_run_state_prefers_running_then_failure() -> TestResult {
    init_tracing();
    let mut job = JobBuilder::new("trio")
        .action("a", "a")
        .action("b", "b")
        .action("c", "c")
        .build();
    let id = job.build_run(job.now())?;
    job.scheduled_start(&id)?;

    job.fail("trio.1.a", 2)?;
    assert_eq!(job.run(&id).map(|r| r.state()), Some(JobRunState::Running));

    job.mark_unknown("trio.1.b")?;
    job.cancel("trio.1.c")?;
    job.handle_exit("trio.1.c", -1)?;
    assert_eq!(job.run(&id).map(|r| r.state()), Some(JobRunState::Failed));
    Ok(())
}

#[test]
fn job_run_with_successes_and_cancellations_counts_as_cancelled() -> TestResult {
    init_tracing();
    let mut job = JobBuilder::new("pair")
        .action("a", "a")
        .action("b", "b")
        .build();
    let id = job.build_run(job.now())?;
    job.start("pair.1.a")?;
    job.succeed("pair.1.a")?;
    job.cancel("pair.1.b")?;

    assert_eq!(job.run(&id).map(|r| r.state()), Some(JobRunState::Cancelled));
    Ok(())
}
