//! Poll a submitted command to a terminal status.
//!
//! Bounded exponential backoff under a hard deadline. Deadline expiry
//! is an error, never a silent retry: the remote side effect's
//! completion state is unknown at that point, and re-running a
//! non-idempotent script could duplicate it.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::{ChannelError, ChannelResult, CommandId, CommandResult, RemoteChannel};

/// Polling cadence. The interval doubles after every non-terminal poll
/// up to `max_interval`.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub base_interval: Duration,
    pub max_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
        }
    }
}

/// Poll `id` until it reaches a terminal status or `deadline` elapses.
pub async fn poll_until_terminal<C: RemoteChannel + ?Sized>(
    channel: &C,
    id: &CommandId,
    deadline: Duration,
    config: &PollConfig,
) -> ChannelResult<CommandResult> {
    let started = Instant::now();
    let mut interval = config.base_interval;
    let mut polls = 0u32;

    loop {
        let result = channel.poll(id).await?;
        polls += 1;
        if result.status.is_terminal() {
            debug!(command = %id, polls, status = ?result.status, "command reached terminal status");
            return Ok(result);
        }

        let elapsed = started.elapsed();
        if elapsed + interval >= deadline {
            // One last poll at the deadline edge, then give up.
            let remaining = deadline.saturating_sub(elapsed);
            if !remaining.is_zero() {
                tokio::time::sleep(remaining).await;
                let last = channel.poll(id).await?;
                if last.status.is_terminal() {
                    debug!(command = %id, polls = polls + 1, "command finished at deadline edge");
                    return Ok(last);
                }
            }
            return Err(ChannelError::DeadlineExceeded {
                id: id.clone(),
                deadline,
            });
        }

        trace!(command = %id, ?interval, "command not terminal, backing off");
        tokio::time::sleep(interval).await;
        interval = (interval * 2).min(config.max_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandStatus, ScriptedChannel};

    fn fast_config() -> PollConfig {
        PollConfig {
            base_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn returns_immediately_terminal_result() {
        let channel = ScriptedChannel::new();
        channel.stub("echo", vec![CommandResult::success("ok\n")]);

        let id = channel.submit("host-1", "echo ok").await.unwrap();
        let result = poll_until_terminal(&channel, &id, Duration::from_secs(1), &fast_config())
            .await
            .unwrap();
        assert_eq!(result.status, CommandStatus::Success);
        assert_eq!(result.stdout, "ok\n");
    }

    #[tokio::test]
    async fn polls_through_pending_states() {
        let channel = ScriptedChannel::new();
        channel.stub(
            "slow",
            vec![
                CommandResult::pending(),
                CommandResult::in_progress(),
                CommandResult::success("done"),
            ],
        );

        let id = channel.submit("host-1", "slow job").await.unwrap();
        let result = poll_until_terminal(&channel, &id, Duration::from_secs(2), &fast_config())
            .await
            .unwrap();
        assert_eq!(result.status, CommandStatus::Success);
        assert!(channel.poll_count(&id) >= 3);
    }

    #[tokio::test]
    async fn deadline_exceeded_when_never_terminal() {
        let channel = ScriptedChannel::new();
        channel.stub("stuck", vec![CommandResult::in_progress()]);

        let id = channel.submit("host-1", "stuck job").await.unwrap();
        let err = poll_until_terminal(
            &channel,
            &id,
            Duration::from_millis(40),
            &fast_config(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChannelError::DeadlineExceeded { .. }));
    }

    #[tokio::test]
    async fn backoff_doubles_and_caps() {
        let config = PollConfig {
            base_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(4),
        };
        // 1 → 2 → 4 → 4 ...
        let mut interval = config.base_interval;
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(interval);
            interval = (interval * 2).min(config.max_interval);
        }
        assert_eq!(
            seen,
            vec![
                Duration::from_millis(1),
                Duration::from_millis(2),
                Duration::from_millis(4),
                Duration::from_millis(4),
            ]
        );
    }
}
