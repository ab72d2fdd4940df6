//! Process supervision — stop, start, and confirm exactly one
//! application instance.
//!
//! Stopping matches by executable identity AND command line containing
//! the entry point, never by executable alone, so unrelated processes
//! sharing the interpreter survive. Matching is pluggable through
//! [`ProcessMatcher`] so a pid file (or any other strategy) can stand
//! in without touching the controller.
//!
//! Starting detaches the process from the command-execution session
//! and then re-queries the process table: the launch call's immediate
//! return is not evidence the process survived.

use std::time::Duration;

use tracing::{debug, warn};

use drydock_channel::{PollConfig, RemoteChannel};
use drydock_core::{
    DeployError, DeploymentRequest, ProcessHandle, StageName, StageOutcome, StageResult,
    parse_marker_fields,
};

use crate::runner::{ScriptOutput, run_script};

const STOPPED_MARKER: &str = "drydock: stopped ";
const STARTED_MARKER: &str = "drydock: started ";
const CMDLINE_MARKER: &str = "drydock: cmdline ";

/// Renders the shell fragment that prints one matching pid per line.
pub trait ProcessMatcher: Send + Sync {
    fn list_pids_fragment(&self) -> String;

    fn describe(&self) -> String;
}

/// Default strategy: executable identity plus entry-point substring in
/// the command line.
pub struct CommandLineMatcher {
    pub executable: String,
    pub entry_point: String,
}

impl CommandLineMatcher {
    pub fn from_request(request: &DeploymentRequest) -> Self {
        Self {
            executable: request.executable.clone(),
            entry_point: request.entry_point.clone(),
        }
    }
}

impl ProcessMatcher for CommandLineMatcher {
    fn list_pids_fragment(&self) -> String {
        format!(
            r#"for pid in $(pgrep -x '{exe}' 2>/dev/null); do
    if grep -a -q '{entry}' "/proc/$pid/cmdline" 2>/dev/null; then
        echo "$pid"
    fi
done"#,
            exe = self.executable,
            entry = self.entry_point,
        )
    }

    fn describe(&self) -> String {
        format!("cmdline({} {})", self.executable, self.entry_point)
    }
}

/// Alternate strategy: a pid file maintained by the application or a
/// service manager.
pub struct PidFileMatcher {
    pub pid_file: String,
}

impl ProcessMatcher for PidFileMatcher {
    fn list_pids_fragment(&self) -> String {
        format!(
            r#"if [ -f '{pid_file}' ]; then
    cat '{pid_file}'
fi"#,
            pid_file = self.pid_file,
        )
    }

    fn describe(&self) -> String {
        format!("pidfile({})", self.pid_file)
    }
}

/// Outcome of the composed stop/confirm/start/confirm sequence.
#[derive(Debug)]
pub struct RestartOutcome {
    pub result: StageResult,
    /// Processes stopped, when the stop script completed.
    pub stopped: Option<u32>,
    /// The confirmed new process, when start completed.
    pub handle: Option<ProcessHandle>,
}

pub struct ProcessSupervisor {
    /// Seconds to wait after TERM before escalating to KILL.
    pub grace: Duration,
    /// Seconds to wait after launch before confirming liveness.
    pub confirm_delay: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5),
            confirm_delay: Duration::from_secs(2),
        }
    }
}

impl ProcessSupervisor {
    fn stop_script(&self, matcher: &dyn ProcessMatcher) -> String {
        format!(
            r#"set -u
pids=$(
{fragment}
)
count=0
for pid in $pids; do
    if kill "$pid" 2>/dev/null; then
        count=$((count + 1))
    fi
done
waited=0
while [ "$waited" -lt {grace} ]; do
    alive=''
    for pid in $pids; do
        [ -d "/proc/$pid" ] && alive="$alive $pid"
    done
    [ -z "$alive" ] && break
    sleep 1
    waited=$((waited + 1))
done
for pid in $pids; do
    if [ -d "/proc/$pid" ]; then
        kill -9 "$pid" 2>/dev/null
        echo "drydock: forced pid=$pid"
    fi
done
echo "drydock: stopped count=$count"
"#,
            fragment = matcher.list_pids_fragment(),
            grace = self.grace.as_secs().max(1),
        )
    }

    fn start_script(&self, request: &DeploymentRequest) -> String {
        format!(
            r#"set -u
app='{app}'
cd "$app" || {{ echo "drydock: working tree missing: $app" >&2; exit 60; }}
nohup {exe} {entry} >/dev/null 2>&1 &
pid=$!
sleep {confirm}
if [ ! -d "/proc/$pid" ]; then
    echo "drydock: process exited immediately pid=$pid" >&2
    exit 61
fi
cwd=$(readlink "/proc/$pid/cwd" 2>/dev/null || echo unknown)
if [ "$cwd" != "$app" ]; then
    echo "drydock: process rooted at $cwd expected $app" >&2
    exit 62
fi
cmdline=$(tr '\0' ' ' < "/proc/$pid/cmdline")
echo "drydock: started pid=$pid cwd=$cwd"
echo "drydock: cmdline $cmdline"
"#,
            app = request.working_dir,
            exe = request.executable,
            entry = request.entry_point,
            confirm = self.confirm_delay.as_secs().max(1),
        )
    }

    /// Stop every process the matcher identifies. Zero matches is
    /// success — first deployment, or the process is already down.
    pub async fn stop_all<C: RemoteChannel + ?Sized>(
        &self,
        channel: &C,
        request: &DeploymentRequest,
        matcher: &dyn ProcessMatcher,
        deadline: Duration,
        poll: &PollConfig,
    ) -> (ScriptOutput, Option<u32>) {
        let script = self.stop_script(matcher);
        let output = run_script(channel, &request.host, &script, deadline, poll).await;
        let stopped = output
            .stdout
            .lines()
            .find(|line| line.starts_with(STOPPED_MARKER))
            .and_then(|line| parse_marker_fields(line).get("count").cloned())
            .and_then(|v| v.parse::<u32>().ok());
        if let Some(count) = stopped {
            debug!(host = %request.host, count, matcher = %matcher.describe(), "processes stopped");
        }
        (output, stopped)
    }

    /// Launch the entry point detached, then confirm from the process
    /// table that it is alive and rooted at the expected directory.
    pub async fn start<C: RemoteChannel + ?Sized>(
        &self,
        channel: &C,
        request: &DeploymentRequest,
        deadline: Duration,
        poll: &PollConfig,
    ) -> (ScriptOutput, Option<ProcessHandle>) {
        let script = self.start_script(request);
        let output = run_script(channel, &request.host, &script, deadline, poll).await;
        let handle = parse_handle(&output);
        if let Some(ref h) = handle {
            debug!(host = %request.host, pid = h.pid, cwd = %h.working_dir, "process confirmed alive");
        }
        (output, handle)
    }

    /// Stop, confirm, start, confirm — as close to atomic as the
    /// channel allows, folded into one stage result. A stop failure
    /// skips the start: the process state is unknown and rollback must
    /// decide.
    pub async fn restart<C: RemoteChannel + ?Sized>(
        &self,
        channel: &C,
        request: &DeploymentRequest,
        matcher: &dyn ProcessMatcher,
        stage: StageName,
        deadline: Duration,
        poll: &PollConfig,
    ) -> RestartOutcome {
        let (stop_output, stopped) = self
            .stop_all(channel, request, matcher, deadline, poll)
            .await;

        if !stop_output.succeeded() {
            let detail = format!("stop failed: {}", stop_output.failure_detail());
            warn!(host = %request.host, %detail, "process stop failed");
            let result = stop_output.into_result(
                stage,
                1,
                StageOutcome::HardFail {
                    error: classify(stage, detail),
                },
            );
            return RestartOutcome {
                result,
                stopped,
                handle: None,
            };
        }

        let (start_output, handle) = self.start(channel, request, deadline, poll).await;

        let outcome = if start_output.succeeded() && handle.is_some() {
            StageOutcome::Ok
        } else {
            let detail = if start_output.succeeded() {
                "start confirmation missing from process table output".to_string()
            } else {
                format!("start failed: {}", start_output.failure_detail())
            };
            warn!(host = %request.host, %detail, "process start failed");
            StageOutcome::HardFail {
                error: classify(stage, detail),
            }
        };

        let result = StageResult {
            stage,
            attempt: 1,
            exit_code: start_output.exit_code,
            stdout: format!(
                "== stop ==\n{}== start ==\n{}",
                stop_output.stdout, start_output.stdout
            ),
            stderr: format!("{}{}", stop_output.stderr, start_output.stderr),
            duration_ms: stop_output.duration_ms + start_output.duration_ms,
            outcome,
        };

        RestartOutcome {
            result,
            stopped,
            handle,
        }
    }
}

/// Rollback restarts classify as rollback failures; everything else is
/// a process failure.
fn classify(stage: StageName, detail: String) -> DeployError {
    if stage == StageName::RollbackRestart {
        DeployError::Rollback(detail)
    } else {
        DeployError::Process(detail)
    }
}

fn parse_handle(output: &ScriptOutput) -> Option<ProcessHandle> {
    let started = output
        .stdout
        .lines()
        .find(|line| line.starts_with(STARTED_MARKER))?;
    let fields = parse_marker_fields(started);
    let pid = fields.get("pid")?.parse::<u32>().ok()?;
    let working_dir = fields.get("cwd")?.clone();
    let command_line = output
        .stdout
        .lines()
        .find_map(|line| line.strip_prefix(CMDLINE_MARKER))
        .unwrap_or("")
        .trim()
        .to_string();
    Some(ProcessHandle {
        pid,
        working_dir,
        command_line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use drydock_channel::{CommandResult, ScriptedChannel};
    use drydock_core::Environment;

    fn request() -> DeploymentRequest {
        DeploymentRequest {
            environment: Environment::Development,
            host: "web-1".into(),
            revision: "main".into(),
            executable: "python3".into(),
            entry_point: "app.py".into(),
            install_root: "/srv/app/releases".into(),
            working_dir: "/srv/app/live".into(),
            manifest_path: "requirements.txt".into(),
            health_endpoint: "http://web-1:8000/status".into(),
        }
    }

    fn fast_poll() -> PollConfig {
        PollConfig {
            base_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn cmdline_matcher_requires_both_identity_and_entry_point() {
        let matcher = CommandLineMatcher::from_request(&request());
        let fragment = matcher.list_pids_fragment();
        assert!(fragment.contains("pgrep -x 'python3'"));
        assert!(fragment.contains("grep -a -q 'app.py'"));
    }

    #[test]
    fn pidfile_matcher_reads_the_file() {
        let matcher = PidFileMatcher {
            pid_file: "/var/run/app.pid".into(),
        };
        assert!(matcher.list_pids_fragment().contains("cat '/var/run/app.pid'"));
        assert_eq!(matcher.describe(), "pidfile(/var/run/app.pid)");
    }

    #[test]
    fn start_script_detaches_and_confirms_cwd() {
        let supervisor = ProcessSupervisor::default();
        let script = supervisor.start_script(&request());
        assert!(script.contains("nohup python3 app.py"));
        assert!(script.contains("readlink \"/proc/$pid/cwd\""));
        assert!(script.contains("exit 61"));
    }

    #[tokio::test]
    async fn stop_with_no_matches_returns_zero() {
        let channel = ScriptedChannel::new();
        channel.stub_one("pgrep", CommandResult::success("drydock: stopped count=0\n"));

        let supervisor = ProcessSupervisor::default();
        let matcher = CommandLineMatcher::from_request(&request());
        let (output, stopped) = supervisor
            .stop_all(&channel, &request(), &matcher, Duration::from_secs(1), &fast_poll())
            .await;
        assert!(output.succeeded());
        assert_eq!(stopped, Some(0));
    }

    #[tokio::test]
    async fn restart_happy_path_confirms_handle() {
        let channel = ScriptedChannel::new();
        channel.stub_one("pgrep", CommandResult::success("drydock: stopped count=1\n"));
        channel.stub_one(
            "nohup",
            CommandResult::success(
                "drydock: started pid=4242 cwd=/srv/app/live\ndrydock: cmdline python3 app.py \n",
            ),
        );

        let supervisor = ProcessSupervisor::default();
        let matcher = CommandLineMatcher::from_request(&request());
        let outcome = supervisor
            .restart(
                &channel,
                &request(),
                &matcher,
                StageName::ProcessRestart,
                Duration::from_secs(1),
                &fast_poll(),
            )
            .await;

        assert_eq!(outcome.result.outcome, StageOutcome::Ok);
        assert_eq!(outcome.stopped, Some(1));
        let handle = outcome.handle.unwrap();
        assert_eq!(handle.pid, 4242);
        assert_eq!(handle.working_dir, "/srv/app/live");
        assert!(handle.command_line.contains("app.py"));
        // Both sub-commands captured in one stage result.
        assert!(outcome.result.stdout.contains("== stop =="));
        assert!(outcome.result.stdout.contains("== start =="));
    }

    #[tokio::test]
    async fn immediate_exit_is_process_hard_fail() {
        let channel = ScriptedChannel::new();
        channel.stub_one("pgrep", CommandResult::success("drydock: stopped count=1\n"));
        channel.stub_one(
            "nohup",
            CommandResult::failed(61, "drydock: process exited immediately pid=777\n"),
        );

        let supervisor = ProcessSupervisor::default();
        let matcher = CommandLineMatcher::from_request(&request());
        let outcome = supervisor
            .restart(
                &channel,
                &request(),
                &matcher,
                StageName::ProcessRestart,
                Duration::from_secs(1),
                &fast_poll(),
            )
            .await;

        match &outcome.result.outcome {
            StageOutcome::HardFail {
                error: DeployError::Process(detail),
            } => assert!(detail.contains("start failed")),
            other => panic!("expected process hard fail, got {other:?}"),
        }
        assert!(outcome.handle.is_none());
    }

    #[tokio::test]
    async fn stop_failure_skips_start() {
        let channel = ScriptedChannel::new();
        channel.stub_one("pgrep", CommandResult::failed(1, "kill: permission denied\n"));

        let supervisor = ProcessSupervisor::default();
        let matcher = CommandLineMatcher::from_request(&request());
        let outcome = supervisor
            .restart(
                &channel,
                &request(),
                &matcher,
                StageName::ProcessRestart,
                Duration::from_secs(1),
                &fast_poll(),
            )
            .await;

        assert!(outcome.result.outcome.is_hard_fail());
        // No start script was submitted after the failed stop.
        let scripts = channel.submitted_scripts();
        assert_eq!(scripts.len(), 1);
        assert!(!scripts[0].contains("nohup"));
    }

    #[tokio::test]
    async fn rollback_restart_classifies_as_rollback_error() {
        let channel = ScriptedChannel::new();
        channel.stub_one("pgrep", CommandResult::success("drydock: stopped count=1\n"));
        channel.stub_one("nohup", CommandResult::failed(62, "rooted elsewhere\n"));

        let supervisor = ProcessSupervisor::default();
        let matcher = CommandLineMatcher::from_request(&request());
        let outcome = supervisor
            .restart(
                &channel,
                &request(),
                &matcher,
                StageName::RollbackRestart,
                Duration::from_secs(1),
                &fast_poll(),
            )
            .await;

        match &outcome.result.outcome {
            StageOutcome::HardFail {
                error: DeployError::Rollback(_),
            } => {}
            other => panic!("expected rollback classification, got {other:?}"),
        }
    }
}
