//! Local subprocess channel.
//!
//! Runs submitted scripts on the machine the orchestrator itself runs
//! on, via `sh -c`. Used for development and integration tests; the
//! cloud command-execution service implements the same trait out of
//! tree. The host identifier is recorded but has no routing effect
//! here.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::{ChannelError, ChannelResult, CommandId, CommandResult, CommandStatus, RemoteChannel};

pub struct LocalChannel {
    /// Upper bound for a single script run; on expiry the child is
    /// killed and the command reports `TimedOut`.
    script_timeout: Duration,
    results: Mutex<HashMap<CommandId, CommandResult>>,
    counter: Mutex<u64>,
}

impl LocalChannel {
    pub fn new(script_timeout: Duration) -> Self {
        Self {
            script_timeout,
            results: Mutex::new(HashMap::new()),
            counter: Mutex::new(0),
        }
    }

    fn next_id(&self) -> CommandId {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        format!("local-{}", *counter)
    }
}

#[async_trait::async_trait]
impl RemoteChannel for LocalChannel {
    async fn submit(&self, host: &str, script: &str) -> ChannelResult<CommandId> {
        let id = self.next_id();
        debug!(command = %id, %host, "running script locally");

        let child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ChannelError::Submit {
                host: host.to_string(),
                detail: e.to_string(),
            })?;

        let result = tokio::select! {
            output = child.wait_with_output() => {
                let output = output.map_err(|e| ChannelError::Submit {
                    host: host.to_string(),
                    detail: e.to_string(),
                })?;
                let status = if output.status.success() {
                    CommandStatus::Success
                } else {
                    CommandStatus::Failed
                };
                CommandResult {
                    status,
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }
            }
            _ = tokio::time::sleep(self.script_timeout) => {
                warn!(command = %id, timeout = ?self.script_timeout, "script timed out, killing");
                CommandResult::timed_out()
            }
        };

        self.results.lock().unwrap().insert(id.clone(), result);
        Ok(id)
    }

    async fn poll(&self, id: &CommandId) -> ChannelResult<CommandResult> {
        self.results
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| ChannelError::UnknownCommand(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_script_and_captures_output() {
        let channel = LocalChannel::new(Duration::from_secs(5));
        let id = channel
            .submit("local", "echo out && echo err >&2")
            .await
            .unwrap();
        let result = channel.poll(&id).await.unwrap();
        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
    }

    #[tokio::test]
    async fn nonzero_exit_reports_failed() {
        let channel = LocalChannel::new(Duration::from_secs(5));
        let id = channel
            .submit("local", "echo broken >&2; exit 43")
            .await
            .unwrap();
        let result = channel.poll(&id).await.unwrap();
        assert_eq!(result.status, CommandStatus::Failed);
        assert_eq!(result.exit_code, Some(43));
        assert!(result.stderr.contains("broken"));
    }

    #[tokio::test]
    async fn long_script_times_out() {
        let channel = LocalChannel::new(Duration::from_millis(100));
        let id = channel.submit("local", "sleep 5").await.unwrap();
        let result = channel.poll(&id).await.unwrap();
        assert_eq!(result.status, CommandStatus::TimedOut);
        assert_eq!(result.exit_code, None);
    }

    #[tokio::test]
    async fn unknown_id_errors() {
        let channel = LocalChannel::new(Duration::from_secs(1));
        let err = channel.poll(&"local-9".to_string()).await.unwrap_err();
        assert!(matches!(err, ChannelError::UnknownCommand(_)));
    }
}
