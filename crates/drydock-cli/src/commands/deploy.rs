//! `drydock deploy` — run one deployment attempt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use drydock_channel::{LocalChannel, PollConfig};
use drydock_controller::{ControllerConfig, DeploymentController, JsonlAuditSink, StageTimeouts};
use drydock_core::{
    AttemptOutcome, DeploymentAttempt, DrydockConfig, Environment, StageOutcome, duration_or,
};
use drydock_state::{AttemptStore, EnvironmentLock};

/// Run a deployment and return the process exit code.
pub async fn run(
    environment: &str,
    revision: &str,
    config_path: &Path,
    state_dir_override: Option<&Path>,
) -> anyhow::Result<i32> {
    let env: Environment = environment
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let config = DrydockConfig::from_file(config_path)?;
    let request = config.request_for(env, revision)?;

    let state_dir = state_dir_override
        .map(Path::to_path_buf)
        .or_else(|| config.state_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(".drydock"));
    let audit_dir = config
        .audit_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| state_dir.join("audit"));

    // One attempt per (environment, host): held for the whole run.
    let _lock = EnvironmentLock::try_acquire(&state_dir, &env.to_string(), &request.host)
        .context("acquiring deployment lock")?;
    let store = AttemptStore::open(&state_dir.join("attempts.redb"))?;

    let script_timeout = duration_or(
        config
            .channel
            .as_ref()
            .and_then(|c| c.script_timeout.as_ref()),
        Duration::from_secs(600),
    );
    let channel = LocalChannel::new(script_timeout);

    let poll = match config.poll.as_ref() {
        Some(p) => {
            let defaults = PollConfig::default();
            PollConfig {
                base_interval: duration_or(p.base_interval.as_ref(), defaults.base_interval),
                max_interval: duration_or(p.max_interval.as_ref(), defaults.max_interval),
            }
        }
        None => PollConfig::default(),
    };

    let controller_config = ControllerConfig {
        poll,
        timeouts: StageTimeouts::from_config(config.timeouts.as_ref()),
        rollback_policy: config.rollback_policy(env),
        ..Default::default()
    };

    let mut controller = DeploymentController::new(
        channel,
        JsonlAuditSink::new(&audit_dir),
        controller_config,
    );
    let attempt = controller.deploy(&request).await;

    // History is best-effort after the attempt already concluded.
    if let Err(e) = store.record_attempt(&attempt) {
        warn!(attempt_id = %attempt.id, error = %e, "failed to record attempt history");
    }

    print_summary(&attempt);
    Ok(exit_code(&attempt.outcome))
}

/// 0 success, 2 failed without rollback, 3 rolled back cleanly,
/// 4 rollback failed — the reserved "manual recovery required" code.
fn exit_code(outcome: &AttemptOutcome) -> i32 {
    match outcome {
        AttemptOutcome::Success => 0,
        AttemptOutcome::Failed { .. } => 2,
        AttemptOutcome::RolledBack { .. } => 3,
        AttemptOutcome::RollbackFailed { .. } => 4,
    }
}

fn print_summary(attempt: &DeploymentAttempt) {
    println!(
        "attempt {} ({} @ {}): {}",
        attempt.id,
        attempt.revision,
        attempt.host,
        attempt.outcome.label()
    );

    for stage in &attempt.stages {
        println!(
            "  {:<18} try {:<2} {:>6}ms  {}",
            stage.stage.to_string(),
            stage.attempt,
            stage.duration_ms,
            stage.outcome.label()
        );
    }

    if !attempt.warnings.is_empty() {
        println!("warnings:");
        for warning in &attempt.warnings {
            println!("  [{}] {}", warning.stage, warning.message);
        }
    }

    // The first hard failure's captured output, verbatim.
    if let Some(failure) = attempt.first_hard_failure() {
        if let StageOutcome::HardFail { error } = &failure.outcome {
            println!("failure at {}: {}", failure.stage, error);
        }
        if !failure.stdout.trim().is_empty() {
            println!("--- captured stdout ---");
            print!("{}", failure.stdout);
        }
        if !failure.stderr.trim().is_empty() {
            println!("--- captured stderr ---");
            print!("{}", failure.stderr);
        }
    }

    // Rollback outcome reported distinctly from the original failure,
    // so the operator knows the system state.
    match &attempt.outcome {
        AttemptOutcome::RolledBack { .. } => {
            println!("rollback: completed, prior version restored and restarted");
        }
        AttemptOutcome::RollbackFailed { reason } => {
            println!("rollback: FAILED — manual recovery required ({reason})");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_rollback_failure() {
        assert_eq!(exit_code(&AttemptOutcome::Success), 0);
        assert_eq!(
            exit_code(&AttemptOutcome::Failed {
                reason: "x".into()
            }),
            2
        );
        assert_eq!(
            exit_code(&AttemptOutcome::RolledBack {
                reason: "x".into()
            }),
            3
        );
        assert_eq!(
            exit_code(&AttemptOutcome::RollbackFailed {
                reason: "x".into()
            }),
            4
        );
    }

    #[tokio::test]
    async fn unknown_environment_is_rejected_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("drydock.toml");
        std::fs::write(&config_path, "[environments]\n").unwrap();

        let err = run("staging", "abc", &config_path, Some(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown environment"));
    }

    #[tokio::test]
    async fn missing_environment_table_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("drydock.toml");
        std::fs::write(
            &config_path,
            r#"
[environments.development]
host = "web-1"
install_root = "/srv/app/releases"
working_dir = "/srv/app/live"
executable = "python3"
entry_point = "app.py"
manifest = "requirements.txt"
health_endpoint = "http://web-1:8000/status"
"#,
        )
        .unwrap();

        let err = run("production", "abc", &config_path, Some(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("environments.production"));
    }
}
