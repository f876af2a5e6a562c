// tests/property_dependencies.rs

mod common;
use crate::common::JobBuilder;

use std::collections::HashSet;

use proptest::prelude::*;

use dagcron::dag::{Job, Transition};

/// Requirements per action (action N only requires actions 0..N, so the
/// graph is acyclic), whether each action succeeds, and the order in which
/// running actions are picked to finish.
fn scenario_strategy(
    max_actions: usize,
) -> impl Strategy<Value = (Vec<Vec<usize>>, Vec<bool>, Vec<usize>)> {
    (1..=max_actions).prop_flat_map(|n| {
        (
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..n), n),
            proptest::collection::vec(prop::bool::weighted(0.8), n),
            proptest::collection::vec(any::<usize>(), 0..64),
        )
    })
}

fn build_job(raw_deps: &[Vec<usize>]) -> Job {
    let mut builder = JobBuilder::new("prop");
    for (i, potential) in raw_deps.iter().enumerate() {
        let name = format!("a{i}");
        let deps: HashSet<String> = if i == 0 {
            HashSet::new()
        } else {
            potential.iter().map(|d| format!("a{}", d % i)).collect()
        };
        let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
        builder = builder.action_after(&name, &format!("run {name}"), &deps);
    }
    builder.build()
}

fn check_dispatch(job: &Job, tr: &Transition, running: &mut Vec<String>) {
    for req in &tr.dispatch {
        let run = job.action_run(&req.run).expect("dispatched run exists");
        for required in &run.required_runs {
            let dep = job.action_run(required).expect("required run exists");
            assert!(
                dep.is_success(),
                "{} started while {} was {}",
                run.id,
                dep.id,
                dep.state()
            );
        }
        running.push(req.run.clone());
    }
}

proptest! {
    #[test]
    fn dependents_never_start_before_requirements_succeed(
        (raw_deps, succeeds, picks) in scenario_strategy(8)
    ) {
        let mut job = build_job(&raw_deps);
        let id = job.build_run(job.now()).unwrap();

        let mut running = Vec::new();
        let tr = job.scheduled_start(&id).unwrap();
        check_dispatch(&job, &tr, &mut running);

        let mut picks = picks.into_iter();
        while !running.is_empty() {
            let idx = picks.next().unwrap_or(0) % running.len();
            let run = running.remove(idx);
            let action_idx: usize = run
                .rsplit('.')
                .next()
                .and_then(|name| name.strip_prefix('a'))
                .and_then(|n| n.parse().ok())
                .unwrap();
            let status = if succeeds[action_idx] { 0 } else { 1 };
            let tr = job.handle_exit(&run, status).unwrap();
            check_dispatch(&job, &tr, &mut running);
        }

        let job_run = job.run(&id).unwrap();
        for run in &job_run.runs {
            if run.is_done() {
                continue;
            }
            // Anything left over waits behind a requirement that did not succeed.
            prop_assert!(run.is_blocked());
            prop_assert!(run
                .required_runs
                .iter()
                .any(|r| !job.action_run(r).unwrap().is_success()));
        }

        if succeeds.iter().all(|s| *s) {
            prop_assert!(job_run.is_success());
        } else {
            prop_assert!(!job_run.is_success());
        }
    }
}
