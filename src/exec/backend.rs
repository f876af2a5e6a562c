// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of to nodes directly.
//! This makes it easy to swap in a fake executor in tests while keeping the
//! production node layer in [`super::node`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dag::{ExecRequest, KillRequest};
use crate::engine::RuntimeEvent;
use crate::errors::Result;

use super::node::{Node, NodeHandle};
use super::transport::Transport;

/// Trait abstracting how action runs are executed.
///
/// Implementations report outcomes asynchronously by sending
/// `RuntimeEvent::ActionExited` / `RuntimeEvent::ConnectionFailed`.
pub trait ExecutorBackend: Send {
    fn dispatch(
        &mut self,
        requests: Vec<ExecRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn kill(
        &mut self,
        requests: Vec<KillRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production backend: one [`Node`] task per hostname, spawned lazily.
pub struct NodeExecutor {
    transport: Arc<dyn Transport>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    nodes: HashMap<String, NodeHandle>,
}

impl NodeExecutor {
    pub fn new(transport: Arc<dyn Transport>, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            transport,
            runtime_tx,
            nodes: HashMap::new(),
        }
    }

    /// Handle of the node for `hostname`, starting it on first use.
    pub fn node(&mut self, hostname: &str) -> NodeHandle {
        self.nodes
            .entry(hostname.to_string())
            .or_insert_with(|| {
                debug!(node = %hostname, "starting node task");
                Node::spawn(hostname, Arc::clone(&self.transport), self.runtime_tx.clone())
            })
            .clone()
    }
}

impl ExecutorBackend for NodeExecutor {
    fn dispatch(
        &mut self,
        requests: Vec<ExecRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for request in requests {
                let node = self.node(&request.node);
                node.execute(request).await?;
            }
            Ok(())
        })
    }

    fn kill(
        &mut self,
        requests: Vec<KillRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for request in requests {
                match self.nodes.get(&request.node) {
                    Some(node) => node.kill(request.run).await?,
                    None => warn!(node = %request.node, run = %request.run, "kill for node with no channels"),
                }
            }
            Ok(())
        })
    }
}
