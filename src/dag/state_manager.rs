// src/dag/state_manager.rs

//! ActionRun transitions.
//!
//! All mutation of run state goes through [`StateManager`], which borrows a
//! job's run history for the duration of one call. Transitions cascade inside
//! a single call: a success releases blocked dependents in the same JobRun
//! and queued runs of the same action in later JobRuns.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::dag::action::{ActionRun, ActionRunState};
use crate::dag::graph::ActionGraph;
use crate::dag::job::{Job, JobRun};
use crate::dag::transition::{ExecRequest, KillRequest, StateChange, Transition};
use crate::errors::{DagcronError, Result};
use crate::types::QueueingPolicy;

/// Position of an ActionRun: (JobRun index in history, ActionRun index).
type Loc = (usize, usize);

pub struct StateManager<'a> {
    job: &'a str,
    runs: &'a mut VecDeque<JobRun>,
    graph: &'a ActionGraph,
    queueing: QueueingPolicy,
    clock: &'a dyn Clock,
}

impl<'a> StateManager<'a> {
    pub fn new(
        job: &'a str,
        runs: &'a mut VecDeque<JobRun>,
        graph: &'a ActionGraph,
        queueing: QueueingPolicy,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            job,
            runs,
            graph,
            queueing,
            clock,
        }
    }

    fn locate(&self, id: &str) -> Result<Loc> {
        for (jr_idx, job_run) in self.runs.iter().enumerate() {
            if let Some(ar_idx) = job_run.runs.iter().position(|r| r.id == id) {
                return Ok((jr_idx, ar_idx));
            }
        }
        Err(DagcronError::RunNotFound(id.to_string()))
    }

    fn get(&self, (jr, ar): Loc) -> &ActionRun {
        &self.runs[jr].runs[ar]
    }

    fn get_mut(&mut self, (jr, ar): Loc) -> &mut ActionRun {
        &mut self.runs[jr].runs[ar]
    }

    fn invalid(&self, loc: Loc, reason: &str) -> DagcronError {
        let run = self.get(loc);
        DagcronError::InvalidTransition {
            run: run.id.clone(),
            reason: format!("{reason} (state is {})", run.state),
        }
    }

    fn set_state(&mut self, loc: Loc, to: ActionRunState, tr: &mut Transition) {
        let run = self.get_mut(loc);
        let from = run.state;
        run.state = to;
        debug!(run = %run.id, %from, %to, "action run state change");
        tr.changes.push(StateChange {
            run: run.id.clone(),
            job_run: run.job_run.clone(),
            from,
            to,
        });
    }

    /// Apply `scheduled_start` to every eligible ActionRun of a JobRun.
    pub fn scheduled_start_job_run(&mut self, job_run: &str) -> Result<Transition> {
        let jr_idx = self
            .runs
            .iter()
            .position(|r| r.id == job_run)
            .ok_or_else(|| DagcronError::RunNotFound(job_run.to_string()))?;

        self.runs[jr_idx].start_requested = true;
        info!(job = %self.job, run = %job_run, "scheduled start of job run");

        let mut tr = Transition::default();
        for ar_idx in 0..self.runs[jr_idx].runs.len() {
            self.try_start((jr_idx, ar_idx), &mut tr);
        }
        Ok(tr)
    }

    /// Start an ActionRun right away, without consulting dependencies or the
    /// overlap policy.
    pub fn start(&mut self, id: &str) -> Result<Transition> {
        let loc = self.locate(id)?;
        match self.get(loc).state {
            ActionRunState::Scheduled | ActionRunState::Queued => {}
            _ => return Err(self.invalid(loc, "only scheduled or queued runs can start")),
        }
        let mut tr = Transition::default();
        self.start_now(loc, &mut tr);
        Ok(tr)
    }

    pub fn succeed(&mut self, id: &str) -> Result<Transition> {
        self.finish(id, ActionRunState::Succeeded, Some(0))
    }

    pub fn fail(&mut self, id: &str, exit_status: i32) -> Result<Transition> {
        self.finish(id, ActionRunState::Failed, Some(exit_status))
    }

    /// Map a process exit status onto success or failure.
    pub fn handle_exit(&mut self, id: &str, exit_status: i32) -> Result<Transition> {
        if exit_status == 0 {
            self.succeed(id)
        } else {
            self.fail(id, exit_status)
        }
    }

    /// The host could not be reached; the command outcome is unknown.
    pub fn mark_unknown(&mut self, id: &str) -> Result<Transition> {
        self.finish(id, ActionRunState::Unknown, None)
    }

    /// Cancel a run.
    ///
    /// Waiting runs are cancelled immediately. Running runs get a kill
    /// request and reach a terminal state once the process exit is reported.
    pub fn cancel(&mut self, id: &str) -> Result<Transition> {
        let loc = self.locate(id)?;
        let mut tr = Transition::default();

        match self.get(loc).state {
            ActionRunState::Scheduled | ActionRunState::Queued => {
                info!(job = %self.job, run = %id, "cancelling waiting action run");
                self.set_state(loc, ActionRunState::Cancelled, &mut tr);
                self.after_terminal(loc, &mut tr);
            }
            ActionRunState::Running => {
                let run = self.get(loc);
                info!(job = %self.job, run = %id, node = %run.node, "requesting kill of running action run");
                tr.kill.push(KillRequest {
                    run: run.id.clone(),
                    node: run.node.clone(),
                });
            }
            _ => return Err(self.invalid(loc, "run already finished")),
        }

        Ok(tr)
    }

    fn finish(
        &mut self,
        id: &str,
        to: ActionRunState,
        exit_status: Option<i32>,
    ) -> Result<Transition> {
        let loc = self.locate(id)?;
        if self.get(loc).state != ActionRunState::Running {
            return Err(self.invalid(loc, "only running runs can finish"));
        }

        let now = self.clock.now();
        {
            let run = self.get_mut(loc);
            run.end_time = Some(now);
            run.exit_status = exit_status;
        }

        match to {
            ActionRunState::Succeeded => info!(job = %self.job, run = %id, "action run succeeded"),
            ActionRunState::Failed => warn!(
                job = %self.job,
                run = %id,
                exit_status,
                "action run failed; dependents stay blocked"
            ),
            _ => warn!(job = %self.job, run = %id, state = %to, "action run finished"),
        }

        let mut tr = Transition::default();
        self.set_state(loc, to, &mut tr);
        self.after_terminal(loc, &mut tr);
        Ok(tr)
    }

    /// The ActionRun of the same action in an older JobRun that is still
    /// pending, if any.
    fn overlapping_run(&self, (jr, ar): Loc) -> Option<&ActionRun> {
        let action = &self.runs[jr].runs[ar].action;
        self.runs
            .iter()
            .skip(jr + 1)
            .filter_map(|older| older.action_run(action))
            .find(|r| !r.is_done())
    }

    /// `scheduled_start`: honour dependencies and the overlap policy, then run.
    fn try_start(&mut self, loc: Loc, tr: &mut Transition) {
        let run = self.get(loc);
        if !matches!(run.state, ActionRunState::Scheduled | ActionRunState::Queued)
            || run.blocked_on_dependency
        {
            return;
        }

        if let Some(earlier) = self.overlapping_run(loc) {
            let earlier = earlier.id.clone();
            match self.queueing {
                QueueingPolicy::AllowQueue => {
                    if self.get(loc).state != ActionRunState::Queued {
                        debug!(
                            job = %self.job,
                            run = %self.get(loc).id,
                            waiting_on = %earlier,
                            "earlier run still pending; queueing"
                        );
                        self.set_state(loc, ActionRunState::Queued, tr);
                    }
                }
                QueueingPolicy::CancelNew => {
                    info!(
                        job = %self.job,
                        run = %self.get(loc).id,
                        overlapping = %earlier,
                        "earlier run still pending; cancelling new run"
                    );
                    self.set_state(loc, ActionRunState::Cancelled, tr);
                    self.after_terminal(loc, tr);
                }
            }
            return;
        }

        self.start_now(loc, tr);
    }

    fn start_now(&mut self, loc: Loc, tr: &mut Transition) {
        let now = self.clock.now();
        let job = self.job.to_string();
        {
            let run = self.get_mut(loc);
            run.blocked_on_dependency = false;
            if run.start_time.is_none() {
                run.start_time = Some(now);
            }
        }
        self.set_state(loc, ActionRunState::Running, tr);

        let run = self.get(loc);
        info!(job = %job, run = %run.id, node = %run.node, command = %run.command, "starting action run");
        tr.dispatch.push(ExecRequest {
            run: run.id.clone(),
            job,
            node: run.node.clone(),
            command: run.command.clone(),
            stdout_path: run.stdout_path.clone(),
            stderr_path: run.stderr_path.clone(),
        });
    }

    /// Bookkeeping after an ActionRun became terminal.
    fn after_terminal(&mut self, loc: Loc, tr: &mut Transition) {
        let (jr_idx, _) = loc;
        tr.completed.push(self.get(loc).id.clone());

        if self.get(loc).state == ActionRunState::Succeeded {
            self.release_dependents(loc, tr);
        }
        self.release_queued_successors(loc, tr);

        let job_run = &self.runs[jr_idx];
        if job_run.is_done() && !tr.job_runs_finished.contains(&job_run.id) {
            info!(job = %self.job, run = %job_run.id, state = %job_run.state(), "job run finished");
            tr.job_runs_finished.push(job_run.id.clone());
        }
    }

    /// Unblock dependents in the same JobRun whose requirements all succeeded.
    fn release_dependents(&mut self, (jr_idx, ar_idx): Loc, tr: &mut Transition) {
        let action = self.runs[jr_idx].runs[ar_idx].action.clone();
        let graph = self.graph;

        for dependent in graph.dependents_of(&action) {
            let job_run = &self.runs[jr_idx];
            let Some(dep_idx) = job_run.runs.iter().position(|r| &r.action == dependent) else {
                continue;
            };
            let candidate = &job_run.runs[dep_idx];
            if !candidate.is_blocked() {
                continue;
            }
            let satisfied = candidate.required_runs.iter().all(|req| {
                job_run
                    .runs
                    .iter()
                    .any(|r| &r.id == req && r.state == ActionRunState::Succeeded)
            });
            if satisfied {
                debug!(job = %self.job, run = %candidate.id, "dependencies satisfied");
                self.runs[jr_idx].runs[dep_idx].blocked_on_dependency = false;
                self.try_start((jr_idx, dep_idx), tr);
            }
        }
    }

    /// Re-examine queued runs of the same action in newer JobRuns, oldest
    /// first.
    fn release_queued_successors(&mut self, (jr_idx, ar_idx): Loc, tr: &mut Transition) {
        let action = self.runs[jr_idx].runs[ar_idx].action.clone();

        for newer in (0..jr_idx).rev() {
            let Some(idx) = self.runs[newer].runs.iter().position(|r| r.action == action) else {
                continue;
            };
            if self.runs[newer].runs[idx].state == ActionRunState::Queued {
                self.try_start((newer, idx), tr);
            }
        }
    }
}

/// Entry points of the state machine, addressed by run id.
impl Job {
    fn state_manager(&mut self) -> StateManager<'_> {
        StateManager::new(
            &self.name,
            &mut self.runs,
            &self.graph,
            self.queueing,
            self.clock.as_ref(),
        )
    }

    /// Called when a JobRun's scheduled time has arrived.
    pub fn scheduled_start(&mut self, job_run: &str) -> Result<Transition> {
        self.state_manager().scheduled_start_job_run(job_run)
    }

    pub fn start(&mut self, run: &str) -> Result<Transition> {
        self.state_manager().start(run)
    }

    pub fn succeed(&mut self, run: &str) -> Result<Transition> {
        self.state_manager().succeed(run)
    }

    pub fn fail(&mut self, run: &str, exit_status: i32) -> Result<Transition> {
        self.state_manager().fail(run, exit_status)
    }

    pub fn handle_exit(&mut self, run: &str, exit_status: i32) -> Result<Transition> {
        self.state_manager().handle_exit(run, exit_status)
    }

    pub fn mark_unknown(&mut self, run: &str) -> Result<Transition> {
        self.state_manager().mark_unknown(run)
    }

    pub fn cancel(&mut self, run: &str) -> Result<Transition> {
        self.state_manager().cancel(run)
    }
}
