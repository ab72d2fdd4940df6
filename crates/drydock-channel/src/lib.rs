//! drydock-channel — the remote command execution boundary.
//!
//! The orchestrator never talks to a target host directly. Everything
//! it does on a host goes through one opaque operation: submit a
//! script, poll until the command reaches a terminal status, read the
//! captured output. The channel gives at-most-once delivery and no
//! cancellation — a script that was dispatched may run to completion
//! even if the poller gives up on it.
//!
//! # Components
//!
//! - **`RemoteChannel`** — the submit/poll trait
//! - **`poll`** — bounded exponential-backoff polling with a hard deadline
//! - **`scripted`** — canned-response channel for tests
//! - **`local`** — runs scripts on the local machine (development)

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod local;
pub mod poll;
pub mod scripted;

pub use local::LocalChannel;
pub use poll::{PollConfig, poll_until_terminal};
pub use scripted::ScriptedChannel;

/// Identifier of a submitted command, scoped to one channel.
pub type CommandId = String;

/// Lifecycle status of a submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    TimedOut,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Success | CommandStatus::Failed | CommandStatus::TimedOut
        )
    }
}

/// Snapshot of a command as reported by the channel. Non-terminal
/// statuses carry whatever partial output the channel has so far
/// (usually none).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn pending() -> Self {
        Self {
            status: CommandStatus::Pending,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn in_progress() -> Self {
        Self {
            status: CommandStatus::InProgress,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Success,
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Failed,
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn timed_out() -> Self {
        Self {
            status: CommandStatus::TimedOut,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Errors crossing the channel boundary.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("submit to host {host} failed: {detail}")]
    Submit { host: String, detail: String },

    #[error("poll of command {0} failed: {1}")]
    Poll(CommandId, String),

    #[error("unknown command id: {0}")]
    UnknownCommand(CommandId),

    #[error("command {id} did not reach a terminal status within {deadline:?}")]
    DeadlineExceeded { id: CommandId, deadline: Duration },
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Submit a script to a named host and retrieve its result.
///
/// Implementations must tolerate polls of already-terminal commands
/// (returning the same result again) — the orchestrator may re-read a
/// result while assembling stage output.
#[async_trait::async_trait]
pub trait RemoteChannel: Send + Sync {
    async fn submit(&self, host: &str, script: &str) -> ChannelResult<CommandId>;

    async fn poll(&self, id: &CommandId) -> ChannelResult<CommandResult>;
}

#[async_trait::async_trait]
impl<T: RemoteChannel + ?Sized> RemoteChannel for std::sync::Arc<T> {
    async fn submit(&self, host: &str, script: &str) -> ChannelResult<CommandId> {
        (**self).submit(host, script).await
    }

    async fn poll(&self, id: &CommandId) -> ChannelResult<CommandResult> {
        (**self).poll(id).await
    }
}
