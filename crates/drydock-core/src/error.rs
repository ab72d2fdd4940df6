//! Deployment error taxonomy.
//!
//! Every hard stage failure is classified into one of these variants.
//! The variant decides what the controller does next: connectivity and
//! sync failures abort with nothing changed on the host, process and
//! health failures trigger rollback, and a rollback failure is terminal.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified deployment failure, carried inside a hard-failed
/// `StageOutcome` and serialized into audit records.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DeployError {
    /// Target unreachable via the command channel. Nothing was changed;
    /// no rollback is attempted.
    #[error("connectivity check failed: {0}")]
    Connectivity(String),

    /// Snapshot rotation failed while a prior version exists. Aborts
    /// before any host mutation — deploying without a rollback point
    /// would make every later failure unrecoverable.
    #[error("backup rotation failed: {0}")]
    Backup(String),

    /// Revision unresolvable or working tree locked. Pre-deployment
    /// state untouched; no rollback.
    #[error("code sync failed: {0}")]
    Sync(String),

    /// Dependency reconcile failed outright (soft per-package failures
    /// never produce this variant).
    #[error("dependency install failed: {0}")]
    Dependency(String),

    /// Process stop or start failed. Triggers rollback.
    #[error("process control failed: {0}")]
    Process(String),

    /// The process is running but never verified healthy. Triggers
    /// rollback.
    #[error("health verification failed: {0}")]
    HealthCheck(String),

    /// Rollback itself failed. Terminal; requires manual intervention
    /// and is never auto-retried.
    #[error("rollback failed: {0}")]
    Rollback(String),
}

impl DeployError {
    /// Whether this failure leaves the host in a state that rollback
    /// can (and should) repair. Connectivity, backup, and sync failures
    /// happen before the running process is touched.
    pub fn is_reversible(&self) -> bool {
        matches!(
            self,
            DeployError::Process(_) | DeployError::HealthCheck(_) | DeployError::Dependency(_)
        )
    }
}
