use serde::{Deserialize, Serialize};

/// What to do when a new run of an action is ready to start while the same
/// action from an earlier JobRun has not finished yet.
///
/// - `AllowQueue`: park the new run in `QUEUED`; it starts automatically once
///   the earlier run reaches a terminal state (default).
/// - `CancelNew`: the new run goes straight to `CANCELLED` and never executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueingPolicy {
    AllowQueue,
    CancelNew,
}

impl Default for QueueingPolicy {
    fn default() -> Self {
        QueueingPolicy::AllowQueue
    }
}

/// Which transport the node layer uses to reach hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// OpenSSH with one ControlMaster connection per host.
    Ssh,
    /// Run everything through the local shell (hostnames are labels only).
    Local,
}

impl Default for TransportKind {
    fn default() -> Self {
        TransportKind::Ssh
    }
}
