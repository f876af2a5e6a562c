// src/exec/pool.rs

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::BuildError;

/// A named set of hosts among which action runs are distributed.
///
/// Resolution rotates through the members with an atomic cursor, so it is
/// safe to call from several jobs at once and never looks at run content.
#[derive(Debug)]
pub struct NodePool {
    name: String,
    nodes: Vec<String>,
    cursor: AtomicUsize,
}

impl NodePool {
    pub fn new(name: impl Into<String>, nodes: Vec<String>) -> Self {
        Self {
            name: name.into(),
            nodes,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Pool containing a single host, named after it.
    pub fn single(hostname: impl Into<String>) -> Self {
        let hostname = hostname.into();
        Self::new(hostname.clone(), vec![hostname])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pick the next host in round-robin order.
    pub fn next_node(&self) -> Result<&str, BuildError> {
        if self.nodes.is_empty() {
            return Err(BuildError::NoNode(self.name.clone()));
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.nodes.len();
        Ok(&self.nodes[idx])
    }
}
