//! drydock-stages — the discrete steps of a deployment attempt.
//!
//! Each stage renders a POSIX shell script from the immutable
//! `DeploymentRequest`, submits it through the remote command channel,
//! polls to a terminal status, and classifies the captured output into
//! a `StageResult`. No stage assumes ambient filesystem state on the
//! target: every path it touches is an explicit request parameter.
//!
//! # Components
//!
//! - **`connectivity`** — channel reachability probe
//! - **`backup`** — snapshot rotation and rollback restore
//! - **`sync`** — force the working tree to a revision
//! - **`deps`** — reconcile the dependency manifest
//! - **`process`** — stop/start supervision with pluggable matching
//! - **`health`** — endpoint verification with environment-scoped TLS

pub mod backup;
pub mod connectivity;
pub mod deps;
pub mod health;
pub mod process;
pub mod runner;
pub mod sync;

pub use backup::{restore_snapshot, rotate_and_backup};
pub use health::HealthVerifier;
pub use process::{CommandLineMatcher, PidFileMatcher, ProcessMatcher, ProcessSupervisor};
pub use runner::ScriptOutput;
