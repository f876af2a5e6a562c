// src/exec/transport.rs

//! Contract between the node layer and whatever actually reaches hosts.
//!
//! A [`Transport`] opens one [`Connection`] per host. Each command runs in
//! its own channel over that connection and reports back through a stream of
//! [`ChannelEvent`]s. Connection-level problems are [`ConnectionError`]s or
//! [`ChannelEvent::Lost`], never a made-up exit status.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::errors::ConnectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A chunk of process output.
    Output { stream: OutputStream, data: Vec<u8> },
    /// The remote process exited with this status.
    Exit(i32),
    /// The channel or its connection broke before an exit status arrived.
    Lost(String),
}

/// A command running over a channel.
#[derive(Debug)]
pub struct RemoteProcess {
    /// Output and exit events, in order. `Exit` or `Lost` is the last event.
    pub events: mpsc::Receiver<ChannelEvent>,
    /// Fire to signal the remote process (best-effort).
    pub kill: oneshot::Sender<()>,
}

#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn open_connection(&self, hostname: &str) -> Result<Arc<dyn Connection>, ConnectionError>;
}

#[async_trait]
pub trait Connection: Send + Sync + Debug {
    /// Open a new channel and start `command` on it.
    async fn open_channel(&self, command: &str) -> Result<RemoteProcess, ConnectionError>;

    async fn close(&self);
}
