// src/exec/mod.rs

//! Remote execution layer.
//!
//! - [`pool`] resolves a host for each action run.
//! - [`transport`] is the contract for reaching hosts.
//! - [`ssh`] provides OpenSSH and local-shell transports.
//! - [`node`] multiplexes concurrent channels over one connection per host.
//! - [`backend`] provides the `ExecutorBackend` trait and the node-backed
//!   implementation the runtime uses in production.

pub mod backend;
pub mod node;
pub mod pool;
pub mod ssh;
pub mod transport;

pub use backend::{ExecutorBackend, NodeExecutor};
pub use node::{ChannelState, Node, NodeHandle};
pub use pool::NodePool;
pub use ssh::{LocalTransport, OpenSshTransport};
pub use transport::{ChannelEvent, Connection, OutputStream, RemoteProcess, Transport};
