#![allow(dead_code)]

use std::error::Error;

use dagcron::dag::{ActionRun, Job, Transition};

pub use dagcron_test_utils::builders::{frozen_clock, utc, JobBuilder};
pub use dagcron_test_utils::{init_tracing, with_timeout};

pub type TestResult = Result<(), Box<dyn Error>>;

/// The ActionRun `action` of JobRun `job_run`.
pub fn action_run<'a>(job: &'a Job, job_run: &str, action: &str) -> &'a ActionRun {
    job.action_run(&format!("{job_run}.{action}"))
        .unwrap_or_else(|| panic!("no action run {job_run}.{action}"))
}

/// Ids of the runs a transition asks to dispatch.
pub fn dispatched(tr: &Transition) -> Vec<String> {
    tr.dispatch.iter().map(|r| r.run.clone()).collect()
}
