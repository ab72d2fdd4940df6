//! Canned-response channel for tests.
//!
//! Tests register stubs keyed by a substring of the script; every
//! submission is matched against the stubs and recorded for later
//! assertion. Stubs may script a sequence of poll responses (Pending,
//! InProgress, then a terminal result) to exercise backoff paths.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::{ChannelError, ChannelResult, CommandId, CommandResult, RemoteChannel};

/// One recorded submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub host: String,
    pub script: String,
}

struct Stub {
    needle: String,
    responses: Vec<CommandResult>,
}

struct CommandSlot {
    /// Remaining poll responses; the last entry is sticky.
    queue: Vec<CommandResult>,
    polls: u32,
}

#[derive(Default)]
struct Inner {
    stubs: Vec<Stub>,
    refused_hosts: Vec<String>,
    submissions: Vec<Submission>,
    commands: HashMap<CommandId, CommandSlot>,
    next_id: u64,
}

/// In-memory [`RemoteChannel`] with scripted responses.
#[derive(Default)]
pub struct ScriptedChannel {
    inner: Mutex<Inner>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a response sequence for any script containing `needle`.
    /// Later stubs take precedence over earlier ones.
    pub fn stub(&self, needle: &str, responses: Vec<CommandResult>) {
        assert!(!responses.is_empty(), "stub needs at least one response");
        let mut inner = self.inner.lock().unwrap();
        inner.stubs.push(Stub {
            needle: needle.to_string(),
            responses,
        });
    }

    /// Shorthand for a single-response stub.
    pub fn stub_one(&self, needle: &str, response: CommandResult) {
        self.stub(needle, vec![response]);
    }

    /// Make every submission to `host` fail at the submit call.
    pub fn refuse_host(&self, host: &str) {
        self.inner.lock().unwrap().refused_hosts.push(host.to_string());
    }

    /// All submissions so far, in order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.inner.lock().unwrap().submissions.clone()
    }

    /// Scripts submitted so far (convenience for containment asserts).
    pub fn submitted_scripts(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .submissions
            .iter()
            .map(|s| s.script.clone())
            .collect()
    }

    /// How many times `id` has been polled.
    pub fn poll_count(&self, id: &CommandId) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .commands
            .get(id)
            .map(|slot| slot.polls)
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl RemoteChannel for ScriptedChannel {
    async fn submit(&self, host: &str, script: &str) -> ChannelResult<CommandId> {
        let mut inner = self.inner.lock().unwrap();

        if inner.refused_hosts.iter().any(|h| h == host) {
            return Err(ChannelError::Submit {
                host: host.to_string(),
                detail: "host refused by test".to_string(),
            });
        }

        inner.submissions.push(Submission {
            host: host.to_string(),
            script: script.to_string(),
        });

        // Most recently added matching stub wins.
        let responses = inner
            .stubs
            .iter()
            .rev()
            .find(|stub| script.contains(&stub.needle))
            .map(|stub| stub.responses.clone())
            .unwrap_or_else(|| vec![CommandResult::success("ok\n")]);

        inner.next_id += 1;
        let id = format!("cmd-{}", inner.next_id);
        inner.commands.insert(
            id.clone(),
            CommandSlot {
                queue: responses,
                polls: 0,
            },
        );
        Ok(id)
    }

    async fn poll(&self, id: &CommandId) -> ChannelResult<CommandResult> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .commands
            .get_mut(id)
            .ok_or_else(|| ChannelError::UnknownCommand(id.clone()))?;
        slot.polls += 1;
        let result = if slot.queue.len() > 1 {
            slot.queue.remove(0)
        } else {
            slot.queue[0].clone()
        };
        Ok(result)
    }
}
