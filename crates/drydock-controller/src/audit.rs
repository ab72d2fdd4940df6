//! Append-only audit trail.
//!
//! One record is written after every stage transition, flushed and
//! synced before the attempt continues — never buffered to the end —
//! so a crash mid-attempt still leaves a usable partial trail. Stage
//! output is spilled to per-stage capture files and referenced from
//! the record instead of being inlined.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use drydock_core::{DeploymentAttempt, StageResult, epoch_secs};

/// One audit trail entry. Terminal outcome records have no stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: u64,
    pub attempt_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Path of the spilled stdout/stderr capture, when one was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Durable destination for audit records.
pub trait AuditSink: Send {
    /// Persist one stage transition before the attempt continues.
    fn record_stage(&mut self, attempt: &DeploymentAttempt, result: &StageResult)
    -> io::Result<()>;

    /// Persist the terminal outcome of the attempt.
    fn record_outcome(&mut self, attempt: &DeploymentAttempt) -> io::Result<()>;
}

/// JSON-lines audit sink: `<dir>/<attempt_id>.jsonl` plus one capture
/// file per stage under `<dir>/<attempt_id>/`.
pub struct JsonlAuditSink {
    dir: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn append(&self, attempt_id: &str, record: &AuditRecord) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{attempt_id}.jsonl"));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let line = serde_json::to_string(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(file, "{line}")?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn spill_capture(&self, attempt_id: &str, result: &StageResult) -> io::Result<PathBuf> {
        let capture_dir = self.dir.join(attempt_id);
        fs::create_dir_all(&capture_dir)?;
        let path = capture_dir.join(format!("{}-{}.log", result.stage, result.attempt));
        let mut file = File::create(&path)?;
        writeln!(file, "== stdout ==")?;
        file.write_all(result.stdout.as_bytes())?;
        writeln!(file, "== stderr ==")?;
        file.write_all(result.stderr.as_bytes())?;
        file.sync_data()?;
        Ok(path)
    }
}

impl AuditSink for JsonlAuditSink {
    fn record_stage(
        &mut self,
        attempt: &DeploymentAttempt,
        result: &StageResult,
    ) -> io::Result<()> {
        let output_ref = self.spill_capture(&attempt.id, result)?;
        let detail = match &result.outcome {
            drydock_core::StageOutcome::Ok => None,
            drydock_core::StageOutcome::SoftFail { warning } => Some(warning.clone()),
            drydock_core::StageOutcome::HardFail { error } => Some(error.to_string()),
        };
        let record = AuditRecord {
            timestamp: epoch_secs(),
            attempt_id: attempt.id.clone(),
            stage: Some(result.stage.to_string()),
            outcome: result.outcome.label().to_string(),
            duration_ms: Some(result.duration_ms),
            output_ref: Some(output_ref.display().to_string()),
            detail,
        };
        self.append(&attempt.id, &record)?;
        debug!(attempt_id = %attempt.id, stage = %result.stage, "audit record written");
        Ok(())
    }

    fn record_outcome(&mut self, attempt: &DeploymentAttempt) -> io::Result<()> {
        let detail = match &attempt.outcome {
            drydock_core::AttemptOutcome::Success => None,
            drydock_core::AttemptOutcome::Failed { reason }
            | drydock_core::AttemptOutcome::RolledBack { reason }
            | drydock_core::AttemptOutcome::RollbackFailed { reason } => Some(reason.clone()),
        };
        let record = AuditRecord {
            timestamp: epoch_secs(),
            attempt_id: attempt.id.clone(),
            stage: None,
            outcome: attempt.outcome.label().to_string(),
            duration_ms: Some(attempt.finished_at.saturating_sub(attempt.started_at) * 1000),
            output_ref: None,
            detail,
        };
        self.append(&attempt.id, &record)
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    pub records: Vec<AuditRecord>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record_stage(
        &mut self,
        attempt: &DeploymentAttempt,
        result: &StageResult,
    ) -> io::Result<()> {
        self.records.push(AuditRecord {
            timestamp: epoch_secs(),
            attempt_id: attempt.id.clone(),
            stage: Some(result.stage.to_string()),
            outcome: result.outcome.label().to_string(),
            duration_ms: Some(result.duration_ms),
            output_ref: None,
            detail: None,
        });
        Ok(())
    }

    fn record_outcome(&mut self, attempt: &DeploymentAttempt) -> io::Result<()> {
        self.records.push(AuditRecord {
            timestamp: epoch_secs(),
            attempt_id: attempt.id.clone(),
            stage: None,
            outcome: attempt.outcome.label().to_string(),
            duration_ms: None,
            output_ref: None,
            detail: None,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drydock_core::{
        DeploymentRequest, Environment, StageName, StageOutcome,
    };

    fn attempt() -> DeploymentAttempt {
        let request = DeploymentRequest {
            environment: Environment::Development,
            host: "web-1".into(),
            revision: "abc123".into(),
            executable: "python3".into(),
            entry_point: "app.py".into(),
            install_root: "/srv/app/releases".into(),
            working_dir: "/srv/app/live".into(),
            manifest_path: "requirements.txt".into(),
            health_endpoint: "http://web-1:8000/status".into(),
        };
        DeploymentAttempt::begin(&request)
    }

    fn stage_result(stage: StageName, outcome: StageOutcome) -> StageResult {
        StageResult {
            stage,
            attempt: 1,
            exit_code: Some(0),
            stdout: "drydock: ping web-1\n".into(),
            stderr: String::new(),
            duration_ms: 42,
            outcome,
        }
    }

    #[test]
    fn stage_records_append_one_line_each() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonlAuditSink::new(dir.path());
        let attempt = attempt();

        sink.record_stage(&attempt, &stage_result(StageName::Connectivity, StageOutcome::Ok))
            .unwrap();
        sink.record_stage(
            &attempt,
            &stage_result(
                StageName::Backup,
                StageOutcome::SoftFail {
                    warning: "no prior version".into(),
                },
            ),
        )
        .unwrap();

        let trail = std::fs::read_to_string(dir.path().join(format!("{}.jsonl", attempt.id))).unwrap();
        let lines: Vec<&str> = trail.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.stage.as_deref(), Some("connectivity"));
        assert_eq!(first.outcome, "ok");

        let second: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.outcome, "soft_fail");
        assert_eq!(second.detail.as_deref(), Some("no prior version"));
    }

    #[test]
    fn capture_file_holds_stage_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonlAuditSink::new(dir.path());
        let attempt = attempt();

        sink.record_stage(&attempt, &stage_result(StageName::Connectivity, StageOutcome::Ok))
            .unwrap();

        let capture = dir
            .path()
            .join(&attempt.id)
            .join("connectivity-1.log");
        let content = std::fs::read_to_string(capture).unwrap();
        assert!(content.contains("drydock: ping web-1"));
    }

    #[test]
    fn outcome_record_has_no_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonlAuditSink::new(dir.path());
        let mut attempt = attempt();
        attempt.finished_at = attempt.started_at + 3;
        attempt.outcome = drydock_core::AttemptOutcome::Success;

        sink.record_outcome(&attempt).unwrap();

        let trail = std::fs::read_to_string(dir.path().join(format!("{}.jsonl", attempt.id))).unwrap();
        let record: AuditRecord = serde_json::from_str(trail.lines().next().unwrap()).unwrap();
        assert!(record.stage.is_none());
        assert_eq!(record.outcome, "success");
    }
}
