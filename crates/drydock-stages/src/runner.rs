//! Shared submit/poll/capture plumbing for stage scripts.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use drydock_channel::{
    ChannelError, CommandStatus, PollConfig, RemoteChannel, poll_until_terminal,
};
use drydock_core::{StageName, StageOutcome, StageResult};

/// Raw outcome of one script run, before stage-specific classification.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub status: CommandStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Set when the channel itself failed (submit error, poll error,
    /// or polling deadline exceeded) rather than the script.
    pub channel_failure: Option<String>,
}

impl ScriptOutput {
    pub fn succeeded(&self) -> bool {
        self.channel_failure.is_none() && self.status == CommandStatus::Success
    }

    /// Human-readable failure description for error classification.
    pub fn failure_detail(&self) -> String {
        if let Some(ref failure) = self.channel_failure {
            return failure.clone();
        }
        match self.status {
            CommandStatus::TimedOut => "command timed out on the channel".to_string(),
            _ => {
                let code = self
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let detail = if self.stderr.trim().is_empty() {
                    self.stdout.trim()
                } else {
                    self.stderr.trim()
                };
                format!("exit code {code}: {detail}")
            }
        }
    }

    /// Fold this output into a classified stage result.
    pub fn into_result(self, stage: StageName, attempt: u32, outcome: StageOutcome) -> StageResult {
        StageResult {
            stage,
            attempt,
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
            duration_ms: self.duration_ms,
            outcome,
        }
    }
}

/// Submit a script and poll it to a terminal status. Channel failures
/// are folded into the output rather than propagated: the caller's
/// classification decides what they mean for the attempt.
pub async fn run_script<C: RemoteChannel + ?Sized>(
    channel: &C,
    host: &str,
    script: &str,
    deadline: Duration,
    poll: &PollConfig,
) -> ScriptOutput {
    let started = Instant::now();

    let id = match channel.submit(host, script).await {
        Ok(id) => id,
        Err(e) => {
            return ScriptOutput {
                status: CommandStatus::Failed,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: started.elapsed().as_millis() as u64,
                channel_failure: Some(e.to_string()),
            };
        }
    };

    match poll_until_terminal(channel, &id, deadline, poll).await {
        Ok(result) => {
            debug!(command = %id, status = ?result.status, "script finished");
            ScriptOutput {
                status: result.status,
                exit_code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
                duration_ms: started.elapsed().as_millis() as u64,
                channel_failure: None,
            }
        }
        Err(e @ ChannelError::DeadlineExceeded { .. }) => ScriptOutput {
            status: CommandStatus::TimedOut,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: started.elapsed().as_millis() as u64,
            channel_failure: Some(e.to_string()),
        },
        Err(e) => ScriptOutput {
            status: CommandStatus::Failed,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: started.elapsed().as_millis() as u64,
            channel_failure: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drydock_channel::{CommandResult, ScriptedChannel};

    fn fast_poll() -> PollConfig {
        PollConfig {
            base_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn success_output_captured() {
        let channel = ScriptedChannel::new();
        channel.stub_one("echo", CommandResult::success("hello\n"));

        let output = run_script(&channel, "h", "echo hi", Duration::from_secs(1), &fast_poll()).await;
        assert!(output.succeeded());
        assert_eq!(output.stdout, "hello\n");
        assert!(output.channel_failure.is_none());
    }

    #[tokio::test]
    async fn submit_failure_becomes_channel_failure() {
        let channel = ScriptedChannel::new();
        channel.refuse_host("down");

        let output = run_script(&channel, "down", "echo hi", Duration::from_secs(1), &fast_poll()).await;
        assert!(!output.succeeded());
        assert!(output.channel_failure.is_some());
        assert!(output.failure_detail().contains("down"));
    }

    #[tokio::test]
    async fn deadline_becomes_timed_out() {
        let channel = ScriptedChannel::new();
        channel.stub_one("stuck", CommandResult::in_progress());

        let output = run_script(
            &channel,
            "h",
            "stuck job",
            Duration::from_millis(30),
            &fast_poll(),
        )
        .await;
        assert_eq!(output.status, CommandStatus::TimedOut);
        assert!(output.channel_failure.unwrap().contains("terminal status"));
    }

    #[tokio::test]
    async fn failure_detail_prefers_stderr() {
        let channel = ScriptedChannel::new();
        channel.stub_one("bad", CommandResult::failed(43, "cannot resolve revision\n"));

        let output = run_script(&channel, "h", "bad cmd", Duration::from_secs(1), &fast_poll()).await;
        let detail = output.failure_detail();
        assert!(detail.contains("exit code 43"));
        assert!(detail.contains("cannot resolve revision"));
    }
}
