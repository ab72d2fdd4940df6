//! Domain types for deployment orchestration.
//!
//! These types describe one deployment attempt end to end: the
//! immutable request, the ordered stage results, and the terminal
//! outcome. Everything is serializable to JSON for the attempt store
//! and the audit trail.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::DeployError;

/// Unique identifier for a deployment attempt.
pub type AttemptId = String;

/// Identifier of a target host as known to the command channel.
pub type HostId = String;

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Milliseconds since the Unix epoch (attempt id suffix).
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Environment ────────────────────────────────────────────────────

/// Target environment classification.
///
/// Production tightens policy: health verification requires a
/// validated certificate chain, and rollback may be configured to
/// require operator confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            other => Err(format!(
                "unknown environment {other:?}, expected development or production"
            )),
        }
    }
}

// ── Request ────────────────────────────────────────────────────────

/// One accepted deployment request. Immutable once accepted: the
/// controller threads it through every stage, and no stage may mutate
/// it.
///
/// All host paths are explicit here rather than ambient on the target,
/// so the whole pipeline is drivable against a simulated channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub environment: Environment,
    /// Host identifier as the command channel knows it.
    pub host: HostId,
    /// Branch or commit to deploy.
    pub revision: String,
    /// Interpreter or binary that runs the application.
    pub executable: String,
    /// Entry point passed to the executable (also the process-match
    /// needle).
    pub entry_point: String,
    /// Directory on the host holding the `current/` and `previous/`
    /// snapshot generations.
    pub install_root: String,
    /// The live, mutable application working tree.
    pub working_dir: String,
    /// Dependency manifest path, relative to the working tree.
    pub manifest_path: String,
    /// Externally reachable health endpoint URL.
    pub health_endpoint: String,
}

// ── Stages ─────────────────────────────────────────────────────────

/// The fixed stages of a deployment attempt, in execution order, plus
/// the rollback stages appended after a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Connectivity,
    Backup,
    Sync,
    Dependencies,
    ProcessRestart,
    Health,
    RollbackRestore,
    RollbackRestart,
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageName::Connectivity => "connectivity",
            StageName::Backup => "backup",
            StageName::Sync => "sync",
            StageName::Dependencies => "dependencies",
            StageName::ProcessRestart => "process_restart",
            StageName::Health => "health",
            StageName::RollbackRestore => "rollback_restore",
            StageName::RollbackRestart => "rollback_restart",
        };
        write!(f, "{s}")
    }
}

/// How a stage concluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Stage succeeded.
    Ok,
    /// Logged and tolerated; the attempt proceeds with a warning
    /// attached.
    SoftFail { warning: String },
    /// Aborts the remaining stages and, for reversible failures,
    /// triggers rollback.
    HardFail { error: DeployError },
}

impl StageOutcome {
    pub fn is_hard_fail(&self) -> bool {
        matches!(self, StageOutcome::HardFail { .. })
    }

    pub fn is_soft_fail(&self) -> bool {
        matches!(self, StageOutcome::SoftFail { .. })
    }

    /// Short status token used in audit records and log lines.
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Ok => "ok",
            StageOutcome::SoftFail { .. } => "soft_fail",
            StageOutcome::HardFail { .. } => "hard_fail",
        }
    }
}

/// The record of one stage execution. A stage that is retried produces
/// one `StageResult` per try, numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageName,
    /// Try number within the stage (1 unless the stage was retried).
    pub attempt: u32,
    /// Remote exit code, when the stage ran a script to completion.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub outcome: StageOutcome,
}

// ── Attempt ────────────────────────────────────────────────────────

/// Terminal outcome of a deployment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Every stage Ok or SoftFail; the new revision is live and
    /// verified.
    Success,
    /// Hard failure before the running process was touched; nothing to
    /// roll back.
    Failed { reason: String },
    /// Hard failure after host mutation; rollback completed and the
    /// prior version is live again.
    RolledBack { reason: String },
    /// Hard failure and rollback did not complete (or was withheld by
    /// policy). Manual intervention required.
    RollbackFailed { reason: String },
}

impl AttemptOutcome {
    /// Short status token used in audit records and log lines.
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failed { .. } => "failed",
            AttemptOutcome::RolledBack { .. } => "rolled_back",
            AttemptOutcome::RollbackFailed { .. } => "rollback_failed",
        }
    }
}

/// One execution of the controller for a request. Created when the
/// request is accepted; the terminal record is written once to the
/// attempt store and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentAttempt {
    pub id: AttemptId,
    pub environment: Environment,
    pub host: HostId,
    pub revision: String,
    pub started_at: u64,
    pub finished_at: u64,
    /// Ordered stage results, including rollback stages when they ran.
    pub stages: Vec<StageResult>,
    pub outcome: AttemptOutcome,
    /// Soft-failure warnings accumulated across stages, keyed by the
    /// stage that raised them.
    pub warnings: Vec<AttemptWarning>,
}

/// A tolerated failure surfaced on the terminal attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptWarning {
    pub stage: StageName,
    pub message: String,
}

impl DeploymentAttempt {
    /// Open a new attempt for a request. Outcome starts as `Failed`
    /// with an empty reason and is overwritten exactly once when the
    /// attempt finishes.
    pub fn begin(request: &DeploymentRequest) -> Self {
        let started_at = epoch_secs();
        Self {
            id: format!("{}-{}-{}", request.environment, request.host, epoch_millis()),
            environment: request.environment,
            host: request.host.clone(),
            revision: request.revision.clone(),
            started_at,
            finished_at: 0,
            stages: Vec::new(),
            outcome: AttemptOutcome::Failed {
                reason: "attempt not finished".to_string(),
            },
            warnings: Vec::new(),
        }
    }

    /// The first hard-failed stage, if any. Its captured output is what
    /// operators see verbatim.
    pub fn first_hard_failure(&self) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.outcome.is_hard_fail())
    }

    /// Warnings raised by a specific stage.
    pub fn warnings_for(&self, stage: StageName) -> Vec<&AttemptWarning> {
        self.warnings.iter().filter(|w| w.stage == stage).collect()
    }
}

// ── Host-side artifacts ────────────────────────────────────────────

/// Snapshot generation on the target host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotGeneration {
    Current,
    Previous,
}

/// A retained snapshot of deployed application source on the host.
/// At most two generations exist at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub generation: SnapshotGeneration,
    pub created_at: u64,
    /// Number of files captured, when the rotation script reported it.
    pub file_count: Option<u64>,
    /// Set when there was nothing to back up (first-ever deployment).
    pub no_prior_version: bool,
}

/// A running application process as confirmed from the host's process
/// table. Used only within a single attempt; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub working_dir: String,
    pub command_line: String,
}

/// Parse `key=value` tokens from a supervisor confirmation line, e.g.
/// `drydock: started pid=1234 cwd=/srv/app`.
pub fn parse_marker_fields(line: &str) -> BTreeMap<String, String> {
    line.split_whitespace()
        .filter_map(|tok| tok.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
