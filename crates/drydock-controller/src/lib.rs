//! drydock-controller — the deployment attempt state machine.
//!
//! One call, `DeploymentController::deploy`, takes an accepted request
//! through the fixed stage order:
//!
//! ```text
//! Pending → ConnectivityChecked → BackedUp → Synced
//!         → DependenciesUpdated → ProcessRestarted → HealthVerified
//! ```
//!
//! Any hard failure transitions to `RollingBack`, then `RolledBack` or
//! `RollbackFailed` (terminal, manual intervention). Soft failures are
//! accumulated as warnings on the terminal attempt; nothing is
//! silently swallowed. Every stage transition is written to the audit
//! sink before the attempt continues.

pub mod audit;
pub mod controller;

pub use audit::{AuditRecord, AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use controller::{AttemptPhase, ControllerConfig, DeploymentController, StageTimeouts};
