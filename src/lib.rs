// src/lib.rs

pub mod cli;
pub mod clock;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod schedule;
pub mod store;
pub mod template;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::clock::Clock;
use crate::config::{build_jobs, load_and_validate, ConfigFile};
use crate::dag::Job;
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions};
use crate::errors::Result;
use crate::exec::{LocalTransport, NodeExecutor, OpenSshTransport, Transport};
use crate::store::{JsonlRunStore, MemoryRunStore, RunStore};
use crate::types::TransportKind;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and job building
/// - the transport and per-host node actors
/// - the run store
/// - core runtime and its async shell
/// - Ctrl-C handling and `--trigger` requests
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let clock = clock::system();

    if args.dry_run {
        let mut jobs = build_jobs(&cfg, Arc::clone(&clock))?;
        print_dry_run(&cfg, &mut jobs, clock.as_ref());
        return Ok(());
    }

    let jobs = build_jobs(&cfg, Arc::clone(&clock))?;
    info!(jobs = jobs.len(), config = %config_path.display(), "config loaded");

    let transport: Arc<dyn Transport> = match cfg.config.transport {
        TransportKind::Local => Arc::new(LocalTransport),
        TransportKind::Ssh => {
            let mut ssh = OpenSshTransport::new(cfg.config.ssh_control_dir.clone());
            ssh.extra_args = cfg.config.ssh_args.clone();
            Arc::new(ssh)
        }
    };

    let store: Box<dyn RunStore> = match &cfg.config.state_file {
        Some(path) => Box::new(JsonlRunStore::new(path.clone())),
        None => Box::new(MemoryRunStore::new()),
    };

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(256);

    let executor = NodeExecutor::new(transport, rt_tx.clone());

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let options = RuntimeOptions {
        exit_when_idle: args.once,
    };

    // Construct the pure core runtime (single source of truth for semantics).
    let mut core = CoreRuntime::new(jobs, clock, options)?;
    for name in &args.trigger {
        core.trigger_on_start(name)?;
    }

    // Construct the async IO shell around the core.
    let poll_interval = Duration::from_millis(cfg.config.poll_interval_ms);
    let runtime = Runtime::new(core, rt_rx, executor, store, poll_interval);
    let core = runtime.run().await?;

    debug!(idle = core.is_idle(), "runtime finished");
    Ok(())
}

/// Print jobs, placement, schedules and the commands a run built now would
/// execute. Nothing is dispatched.
fn print_dry_run(cfg: &ConfigFile, jobs: &mut [Job], clock: &dyn Clock) {
    println!("dagcron dry-run");
    println!("  config.transport = {:?}", cfg.config.transport);
    println!("  config.poll_interval_ms = {}", cfg.config.poll_interval_ms);
    if let Some(ref dir) = cfg.config.output_dir {
        println!("  config.output_dir = {}", dir.display());
    }
    if let Some(ref file) = cfg.config.state_file {
        println!("  config.state_file = {}", file.display());
    }
    println!();

    for (name, pool) in cfg.node_pool.iter() {
        println!("node_pool {name}: {:?}", pool.nodes);
    }

    println!("jobs ({}):", jobs.len());
    let now = clock.now();
    for job in jobs.iter_mut() {
        println!("  - {}", job.name);
        match &job.scheduler {
            Some(scheduler) => println!("      schedule: {scheduler}"),
            None => println!("      schedule: (trigger only)"),
        }
        println!("      queueing: {:?}", job.queueing);

        match job.build_run(now) {
            Ok(id) => {
                if let Some(job_run) = job.run(&id) {
                    for action_run in &job_run.runs {
                        println!("      action {} @ {}", action_run.action, action_run.node);
                        println!("          cmd: {}", action_run.command);
                        if !action_run.required_runs.is_empty() {
                            println!("          requires: {:?}", action_run.required_runs);
                        }
                    }
                }
            }
            Err(err) => println!("      build error: {err}"),
        }
    }

    debug!("dry-run complete (no execution)");
}
