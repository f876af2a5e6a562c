// src/exec/ssh.rs

//! Process-backed transports.
//!
//! - [`OpenSshTransport`] keeps one OpenSSH ControlMaster connection per host
//!   and runs every channel as a multiplexed `ssh` session over it.
//! - [`LocalTransport`] runs commands through the local shell; hostnames are
//!   only labels. Useful for single-machine setups and tests.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::errors::ConnectionError;
use crate::exec::transport::{ChannelEvent, Connection, OutputStream, RemoteProcess, Transport};

/// `ssh` exits with this status when the failure is its own, not the command's.
const SSH_ERROR_STATUS: i32 = 255;

#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

#[derive(Debug)]
struct LocalConnection {
    hostname: String,
}

#[async_trait]
impl Transport for LocalTransport {
    async fn open_connection(&self, hostname: &str) -> Result<Arc<dyn Connection>, ConnectionError> {
        debug!(node = %hostname, "local transport: connection ready");
        Ok(Arc::new(LocalConnection {
            hostname: hostname.to_string(),
        }))
    }
}

#[async_trait]
impl Connection for LocalConnection {
    async fn open_channel(&self, command: &str) -> Result<RemoteProcess, ConnectionError> {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };
        spawn_process(&mut cmd, &self.hostname, false)
    }

    async fn close(&self) {}
}

/// OpenSSH transport using connection multiplexing.
#[derive(Debug, Clone)]
pub struct OpenSshTransport {
    pub ssh_binary: PathBuf,
    /// Directory holding the ControlMaster sockets.
    pub control_dir: PathBuf,
    /// Extra arguments passed to every `ssh` invocation (e.g. `-l user`).
    pub extra_args: Vec<String>,
}

impl OpenSshTransport {
    pub fn new(control_dir: impl Into<PathBuf>) -> Self {
        Self {
            ssh_binary: PathBuf::from("ssh"),
            control_dir: control_dir.into(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct OpenSshConnection {
    hostname: String,
    control_path: PathBuf,
    ssh_binary: PathBuf,
    extra_args: Vec<String>,
}

impl OpenSshConnection {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.ssh_binary);
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-o")
            .arg("BatchMode=yes")
            .args(&self.extra_args);
        cmd
    }
}

#[async_trait]
impl Transport for OpenSshTransport {
    async fn open_connection(&self, hostname: &str) -> Result<Arc<dyn Connection>, ConnectionError> {
        let conn_err = |reason: String| ConnectionError {
            node: hostname.to_string(),
            reason,
        };

        tokio::fs::create_dir_all(&self.control_dir)
            .await
            .map_err(|e| conn_err(format!("creating control dir: {e}")))?;

        let conn = OpenSshConnection {
            hostname: hostname.to_string(),
            control_path: self.control_dir.join(format!("{hostname}.sock")),
            ssh_binary: self.ssh_binary.clone(),
            extra_args: self.extra_args.clone(),
        };

        // -f -N: authenticate, then background the master with no command.
        let output = conn
            .command()
            .arg("-o")
            .arg("ControlMaster=yes")
            .arg("-o")
            .arg("ControlPersist=yes")
            .arg("-f")
            .arg("-N")
            .arg(hostname)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| conn_err(format!("spawning ssh: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(conn_err(format!(
                "ssh master exited with {}: {}",
                exit_code(output.status),
                stderr.trim()
            )));
        }

        info!(node = %hostname, control_path = %conn.control_path.display(), "ssh connection established");
        Ok(Arc::new(conn))
    }
}

#[async_trait]
impl Connection for OpenSshConnection {
    async fn open_channel(&self, command: &str) -> Result<RemoteProcess, ConnectionError> {
        let mut cmd = self.command();
        cmd.arg("-o")
            .arg("ControlMaster=no")
            .arg(&self.hostname)
            .arg("--")
            .arg(command);
        spawn_process(&mut cmd, &self.hostname, true)
    }

    async fn close(&self) {
        let result = self
            .command()
            .arg("-O")
            .arg("exit")
            .arg(&self.hostname)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) => debug!(node = %self.hostname, code = exit_code(status), "ssh master closed"),
            Err(e) => warn!(node = %self.hostname, error = %e, "failed to close ssh master"),
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Spawn `cmd` and pump its output and exit into a [`RemoteProcess`].
///
/// With `ssh_client`, status 255 is reported as a lost channel.
fn spawn_process(
    cmd: &mut Command,
    hostname: &str,
    ssh_client: bool,
) -> Result<RemoteProcess, ConnectionError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| ConnectionError {
        node: hostname.to_string(),
        reason: format!("spawning process: {e}"),
    })?;

    let (tx, rx) = mpsc::channel::<ChannelEvent>(64);
    let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let hostname = hostname.to_string();

    tokio::spawn(async move {
        let mut pumps = Vec::new();
        if let Some(out) = stdout {
            pumps.push(tokio::spawn(pump(out, OutputStream::Stdout, tx.clone())));
        }
        if let Some(err) = stderr {
            pumps.push(tokio::spawn(pump(err, OutputStream::Stderr, tx.clone())));
        }

        let status = tokio::select! {
            status = child.wait() => status,
            Ok(()) = &mut kill_rx => {
                info!(node = %hostname, "kill requested; signalling process");
                if let Err(e) = child.start_kill() {
                    warn!(node = %hostname, error = %e, "failed to signal process");
                }
                child.wait().await
            }
        };

        for pump in pumps {
            let _ = pump.await;
        }

        let event = match status {
            Ok(status) if ssh_client && exit_code(status) == SSH_ERROR_STATUS => {
                ChannelEvent::Lost(format!("ssh exited with status {SSH_ERROR_STATUS}"))
            }
            Ok(status) => ChannelEvent::Exit(exit_code(status)),
            Err(e) => ChannelEvent::Lost(format!("waiting for process: {e}")),
        };
        let _ = tx.send(event).await;
    });

    Ok(RemoteProcess {
        events: rx,
        kill: kill_tx,
    })
}

/// Forward raw output chunks until EOF.
async fn pump<R>(mut reader: R, stream: OutputStream, tx: mpsc::Sender<ChannelEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let event = ChannelEvent::Output {
                    stream,
                    data: buf[..n].to_vec(),
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(?stream, error = %e, "output read error");
                break;
            }
        }
    }
}
