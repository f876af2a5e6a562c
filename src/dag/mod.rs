// src/dag/mod.rs

//! Jobs, actions and the run-state machine.
//!
//! - [`graph`] holds the action dependency graph and its topological order.
//! - [`action`] defines actions and their per-invocation runs.
//! - [`job`] defines jobs, job runs and run building.
//! - [`state_manager`] implements every ActionRun transition.
//! - [`transition`] describes what a transition produced.

pub mod action;
pub mod graph;
pub mod job;
pub mod state_manager;
pub mod transition;

/// Canonical job name type.
pub type JobName = String;

/// Canonical action name type.
pub type ActionName = String;

/// Identifier of a JobRun (`<job>.<num>`) or ActionRun (`<job>.<num>.<action>`).
pub type RunId = String;

pub use action::{Action, ActionRun, ActionRunState};
pub use graph::ActionGraph;
pub use job::{Job, JobRun, JobRunState};
pub use transition::{ExecRequest, KillRequest, StateChange, Transition};
