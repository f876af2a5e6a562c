// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

/// Raised while building a JobRun / ActionRun. The run is not created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("unknown placeholder '%({0})s' in command template")]
    UnknownPlaceholder(String),

    #[error("placeholder '{0}' does not accept a day/second offset")]
    OffsetNotAllowed(String),

    #[error("offset in '%({0})s' is out of range")]
    OffsetOutOfRange(String),

    #[error("malformed command template near byte {0}")]
    MalformedTemplate(usize),

    #[error("no node available in pool '{0}'")]
    NoNode(String),
}

/// Transport-level failure, distinct from a process exit status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("connection to {node} failed: {reason}")]
pub struct ConnectionError {
    pub node: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum DagcronError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Dependency deadlock in job: {0}")]
    DependencyDeadlock(String),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Invalid transition for {run}: {reason}")]
    InvalidTransition { run: String, reason: String },

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DagcronError>;
