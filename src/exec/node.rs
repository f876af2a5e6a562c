// src/exec/node.rs

//! One remote host: a persistent connection multiplexing many channels.
//!
//! A [`Node`] runs as its own Tokio task. It owns the connection and the
//! `run_states` map; nothing else touches them. The rest of the system talks
//! to it through a [`NodeHandle`], and it reports outcomes back to the
//! runtime as [`RuntimeEvent`]s.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::dag::{ExecRequest, RunId};
use crate::engine::RuntimeEvent;
use crate::errors::ConnectionError;
use crate::exec::transport::{ChannelEvent, Connection, OutputStream, RemoteProcess, Transport};

/// Per-run channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug)]
struct RunChannel {
    state: ChannelState,
    kill: Option<oneshot::Sender<()>>,
    kill_requested: bool,
}

/// Commands accepted by a node task.
#[derive(Debug)]
pub enum NodeCommand {
    Execute(ExecRequest),
    Kill(RunId),
    /// Snapshot of the channel-state map.
    Inspect(oneshot::Sender<HashMap<RunId, ChannelState>>),
}

/// Reports from channel tasks back to their node.
#[derive(Debug)]
enum ChannelNotice {
    Opened {
        run: RunId,
        kill: oneshot::Sender<()>,
    },
    Closed {
        run: RunId,
        connection_lost: bool,
    },
}

/// Cheap, cloneable handle to a running [`Node`] task.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    hostname: String,
    tx: mpsc::Sender<NodeCommand>,
}

impl NodeHandle {
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub async fn execute(&self, request: ExecRequest) -> anyhow::Result<()> {
        self.tx.send(NodeCommand::Execute(request)).await?;
        Ok(())
    }

    pub async fn kill(&self, run: RunId) -> anyhow::Result<()> {
        self.tx.send(NodeCommand::Kill(run)).await?;
        Ok(())
    }

    pub async fn channel_states(&self) -> anyhow::Result<HashMap<RunId, ChannelState>> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(NodeCommand::Inspect(tx)).await?;
        Ok(rx.await?)
    }
}

pub struct Node {
    hostname: String,
    transport: Arc<dyn Transport>,
    connection: Option<Arc<dyn Connection>>,
    run_states: HashMap<RunId, RunChannel>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    notice_tx: mpsc::Sender<ChannelNotice>,
}

impl Node {
    /// Spawn the node task. The connection is opened on first use.
    pub fn spawn(
        hostname: impl Into<String>,
        transport: Arc<dyn Transport>,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
    ) -> NodeHandle {
        let hostname = hostname.into();
        let (tx, rx) = mpsc::channel::<NodeCommand>(64);
        let (notice_tx, notice_rx) = mpsc::channel::<ChannelNotice>(64);

        let node = Node {
            hostname: hostname.clone(),
            transport,
            connection: None,
            run_states: HashMap::new(),
            runtime_tx,
            notice_tx,
        };
        tokio::spawn(node.run(rx, notice_rx));

        NodeHandle { hostname, tx }
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<NodeCommand>,
        mut notice_rx: mpsc::Receiver<ChannelNotice>,
    ) {
        debug!(node = %self.hostname, "node task started");

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(NodeCommand::Execute(request)) => self.execute(request).await,
                    Some(NodeCommand::Kill(run)) => self.kill(&run),
                    Some(NodeCommand::Inspect(reply)) => {
                        let states = self
                            .run_states
                            .iter()
                            .map(|(run, chan)| (run.clone(), chan.state))
                            .collect();
                        let _ = reply.send(states);
                    }
                    None => break,
                },
                Some(notice) = notice_rx.recv() => self.handle_notice(notice),
            }
        }

        if let Some(conn) = self.connection.take() {
            conn.close().await;
        }
        debug!(node = %self.hostname, "node task finished");
    }

    async fn execute(&mut self, request: ExecRequest) {
        self.run_states
            .retain(|_, chan| chan.state != ChannelState::Closed);

        if self.run_states.contains_key(&request.run) {
            warn!(node = %self.hostname, run = %request.run, "channel already active for run; ignoring");
            return;
        }

        self.run_states.insert(
            request.run.clone(),
            RunChannel {
                state: ChannelState::Connecting,
                kill: None,
                kill_requested: false,
            },
        );

        let conn = match self.ensure_connection().await {
            Ok(conn) => conn,
            Err(err) => {
                self.run_states.remove(&request.run);
                // The runtime may itself be waiting on this node's queue.
                let runtime_tx = self.runtime_tx.clone();
                tokio::spawn(async move {
                    report_connection_failure(&runtime_tx, &request.run, err).await;
                });
                return;
            }
        };

        let notices = self.notice_tx.clone();
        let runtime_tx = self.runtime_tx.clone();
        tokio::spawn(run_channel(conn, request, notices, runtime_tx));
    }

    async fn ensure_connection(&mut self) -> Result<Arc<dyn Connection>, ConnectionError> {
        if let Some(conn) = &self.connection {
            return Ok(Arc::clone(conn));
        }
        info!(node = %self.hostname, "opening connection");
        let conn = self.transport.open_connection(&self.hostname).await?;
        self.connection = Some(Arc::clone(&conn));
        Ok(conn)
    }

    fn kill(&mut self, run: &str) {
        match self.run_states.get_mut(run) {
            Some(chan) => match chan.kill.take() {
                Some(kill) => {
                    info!(node = %self.hostname, run = %run, "signalling remote process");
                    let _ = kill.send(());
                }
                None => {
                    debug!(node = %self.hostname, run = %run, state = ?chan.state, "kill deferred until channel opens");
                    chan.kill_requested = true;
                }
            },
            None => debug!(node = %self.hostname, run = %run, "kill for unknown run; ignoring"),
        }
    }

    fn handle_notice(&mut self, notice: ChannelNotice) {
        match notice {
            ChannelNotice::Opened { run, kill } => {
                if let Some(chan) = self.run_states.get_mut(&run) {
                    chan.state = ChannelState::Open;
                    if chan.kill_requested {
                        let _ = kill.send(());
                    } else {
                        chan.kill = Some(kill);
                    }
                    debug!(node = %self.hostname, run = %run, "channel open");
                }
            }
            ChannelNotice::Closed {
                run,
                connection_lost,
            } => {
                if let Some(chan) = self.run_states.get_mut(&run) {
                    chan.state = ChannelState::Closed;
                    chan.kill = None;
                }
                if connection_lost {
                    warn!(node = %self.hostname, run = %run, "connection lost; will reconnect on next run");
                    self.connection = None;
                }
                debug!(node = %self.hostname, run = %run, "channel closed");
            }
        }
    }
}

/// Drive one channel: open it, stream output to files, report the exit.
async fn run_channel(
    conn: Arc<dyn Connection>,
    request: ExecRequest,
    notices: mpsc::Sender<ChannelNotice>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) {
    let run = request.run.clone();

    let RemoteProcess { mut events, kill } = match conn.open_channel(&request.command).await {
        Ok(process) => process,
        Err(err) => {
            let _ = notices
                .send(ChannelNotice::Closed {
                    run: run.clone(),
                    connection_lost: true,
                })
                .await;
            report_connection_failure(&runtime_tx, &run, err).await;
            return;
        }
    };

    let _ = notices
        .send(ChannelNotice::Opened {
            run: run.clone(),
            kill,
        })
        .await;

    let mut sink = OutputSink::open(&request).await;
    let mut outcome = None;
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Output { stream, data } => sink.write(stream, &data).await,
            ChannelEvent::Exit(status) => {
                outcome = Some(Ok(status));
                break;
            }
            ChannelEvent::Lost(reason) => {
                outcome = Some(Err(reason));
                break;
            }
        }
    }
    sink.flush().await;

    let outcome =
        outcome.unwrap_or_else(|| Err("channel closed without exit status".to_string()));

    let _ = notices
        .send(ChannelNotice::Closed {
            run: run.clone(),
            connection_lost: outcome.is_err(),
        })
        .await;

    match outcome {
        Ok(status) => {
            info!(node = %request.node, run = %run, exit_status = status, "remote process exited");
            if runtime_tx
                .send(RuntimeEvent::ActionExited { run, status })
                .await
                .is_err()
            {
                error!(node = %request.node, "runtime channel closed; exit status dropped");
            }
        }
        Err(reason) => {
            let err = ConnectionError {
                node: request.node.clone(),
                reason,
            };
            report_connection_failure(&runtime_tx, &run, err).await;
        }
    }
}

async fn report_connection_failure(
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    run: &str,
    err: ConnectionError,
) {
    warn!(node = %err.node, run = %run, error = %err.reason, "connection failure");
    let event = RuntimeEvent::ConnectionFailed {
        run: run.to_string(),
        error: err,
    };
    if runtime_tx.send(event).await.is_err() {
        error!(run = %run, "runtime channel closed; connection failure dropped");
    }
}

/// Destination files for a run's output. Streams without a path are
/// discarded.
struct OutputSink {
    run: RunId,
    stdout: Option<File>,
    stderr: Option<File>,
}

impl OutputSink {
    async fn open(request: &ExecRequest) -> Self {
        Self {
            run: request.run.clone(),
            stdout: open_append(&request.run, request.stdout_path.as_deref()).await,
            stderr: open_append(&request.run, request.stderr_path.as_deref()).await,
        }
    }

    async fn write(&mut self, stream: OutputStream, data: &[u8]) {
        let file = match stream {
            OutputStream::Stdout => self.stdout.as_mut(),
            OutputStream::Stderr => self.stderr.as_mut(),
        };
        if let Some(file) = file {
            if let Err(e) = file.write_all(data).await {
                warn!(run = %self.run, ?stream, error = %e, "failed to write output; discarding stream");
                match stream {
                    OutputStream::Stdout => self.stdout = None,
                    OutputStream::Stderr => self.stderr = None,
                }
            }
        }
    }

    async fn flush(&mut self) {
        for file in [self.stdout.as_mut(), self.stderr.as_mut()].into_iter().flatten() {
            if let Err(e) = file.flush().await {
                warn!(run = %self.run, error = %e, "failed to flush output file");
            }
        }
    }
}

async fn open_append(run: &str, path: Option<&Path>) -> Option<File> {
    let path = path?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(run = %run, dir = %parent.display(), error = %e, "cannot create output dir");
                return None;
            }
        }
    }
    match OpenOptions::new().create(true).append(true).open(path).await {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(run = %run, path = %path.display(), error = %e, "cannot open output file; discarding");
            None
        }
    }
}
