// src/config/mod.rs

//! Configuration loading and validation for dagcron.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate pools, schedules and action graphs (`validate.rs`).
//! - Build runnable jobs (`build.rs`).

pub mod build;
pub mod loader;
pub mod model;
pub mod validate;

pub use build::build_jobs;
pub use loader::{default_config_path, load_and_validate, load_from_path, parse_config};
pub use model::{ActionConfig, ConfigFile, ConfigSection, JobConfig, NodePoolConfig, RawConfigFile};
