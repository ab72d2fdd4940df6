//! drydock-core — domain types and configuration for the Drydock
//! deployment orchestrator.
//!
//! A deployment takes an application on a remote host from version N to
//! version N+1 through a command-execution channel: backup, sync,
//! dependency reconcile, process restart, health verification, and
//! rollback on hard failure. This crate holds the vocabulary shared by
//! every other crate:
//!
//! - **`types`** — DeploymentRequest, DeploymentAttempt, StageResult,
//!   stage/attempt outcomes, snapshots, process handles
//! - **`config`** — `drydock.toml` parsing and duration strings
//! - **`error`** — the deployment error taxonomy

pub mod config;
pub mod error;
pub mod types;

pub use config::{DrydockConfig, EnvironmentConfig, RollbackPolicy, duration_or, parse_duration};
pub use error::DeployError;
pub use types::*;
