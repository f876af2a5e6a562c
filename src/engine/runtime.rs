// src/engine/runtime.rs

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::store::RunStore;

use super::control::ControlRequest;
use super::core::CoreRuntime;
use super::{CoreCommand, CoreStep, RuntimeEvent};

/// Drives the core runtime in response to `RuntimeEvent`s and poll ticks,
/// delegating execution to an `ExecutorBackend` and persistence to a
/// `RunStore`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// scheduling semantics.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    store: Box<dyn RunStore>,
    poll_interval: Duration,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("store", &self.store)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        store: Box<dyn RunStore>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            core,
            event_rx,
            executor,
            store,
            poll_interval,
        }
    }

    pub fn core(&self) -> &CoreRuntime {
        &self.core
    }

    /// Main event loop.
    ///
    /// - Runs the core's startup step.
    /// - Consumes `RuntimeEvent`s from `event_rx` and poll ticks.
    /// - Executes commands returned by the core (dispatch, kill, persist).
    ///
    /// Returns the core so callers can inspect final state.
    pub async fn run(mut self) -> Result<CoreRuntime> {
        info!(poll_interval = ?self.poll_interval, "dagcron runtime started");

        let step = self.core.start();
        if !self.execute_step(step).await? {
            info!("runtime exiting");
            return Ok(self.core);
        }

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately and startup already polled.
        ticker.tick().await;

        loop {
            let event = tokio::select! {
                maybe = self.event_rx.recv() => match maybe {
                    Some(event) => event,
                    None => {
                        info!("runtime event channel closed; exiting");
                        break;
                    }
                },
                _ = ticker.tick() => RuntimeEvent::Tick,
            };

            if !matches!(event, RuntimeEvent::Tick) {
                debug!(?event, "runtime received event");
            }

            let step = match event {
                RuntimeEvent::Control(request) => self.handle_control(request),
                other => self.core.step(other),
            };

            if !self.execute_step(step).await? {
                break;
            }
        }

        info!("runtime exiting");
        Ok(self.core)
    }

    /// Answer a control request and return the step it produced.
    fn handle_control(&mut self, request: ControlRequest) -> CoreStep {
        match request {
            ControlRequest::Trigger { job, reply } => match self.core.trigger(&job) {
                Ok((summary, step)) => {
                    let _ = reply.send(Ok(summary));
                    step
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                    CoreStep::idle()
                }
            },
            ControlRequest::Cancel { run, reply } => match self.core.cancel(&run) {
                Ok(step) => {
                    let _ = reply.send(Ok(()));
                    step
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                    CoreStep::idle()
                }
            },
            ControlRequest::ListRuns { job, reply } => {
                let _ = reply.send(self.core.list_runs(&job));
                CoreStep::idle()
            }
        }
    }

    /// Execute every command of `step`; returns whether to keep running.
    async fn execute_step(&mut self, step: CoreStep) -> Result<bool> {
        for command in step.commands {
            self.execute_command(command).await?;
        }
        if !step.keep_running {
            info!("core requested exit; stopping runtime");
        }
        Ok(step.keep_running)
    }

    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Dispatch(requests) => {
                let runs: Vec<_> = requests.iter().map(|r| r.run.as_str()).collect();
                debug!(?runs, "dispatching action runs");
                self.executor.dispatch(requests).await?;
            }
            CoreCommand::Kill(requests) => {
                let runs: Vec<_> = requests.iter().map(|r| r.run.as_str()).collect();
                debug!(?runs, "killing action runs");
                self.executor.kill(requests).await?;
            }
            CoreCommand::Persist(snapshots) => {
                for snapshot in &snapshots {
                    if let Err(err) = self.store.save(snapshot) {
                        error!(
                            job_run = %snapshot.job_run.id,
                            error = %err,
                            "failed to persist job run snapshot"
                        );
                    }
                }
            }
            CoreCommand::RequestExit => {
                info!("core issued RequestExit command");
            }
        }
        Ok(())
    }
}
