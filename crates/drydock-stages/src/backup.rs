//! Snapshot rotation and rollback restore.
//!
//! The install root holds at most two generations: `current/` (the
//! tree that was live when the running attempt started) and
//! `previous/` (one generation back). Rotation stages the new copy
//! beside the generations and swaps it in with renames, so a reader
//! never observes a half-rotated state. Snapshots capture source files
//! and the manifest only — `.git` and `.venv` stay behind.

use std::time::Duration;

use tracing::{debug, warn};

use drydock_channel::{PollConfig, RemoteChannel};
use drydock_core::{
    BackupSnapshot, DeployError, DeploymentRequest, SnapshotGeneration, StageName, StageOutcome,
    StageResult, epoch_secs, parse_marker_fields,
};

use crate::runner::run_script;

const NO_PRIOR_MARKER: &str = "drydock: no prior version";
const UP_TO_DATE_MARKER: &str = "drydock: snapshot up to date";
const CREATED_MARKER: &str = "drydock: snapshot created";

fn rotation_script(request: &DeploymentRequest) -> String {
    format!(
        r#"set -u
root='{root}'
app='{app}'
mkdir -p "$root"
if [ ! -d "$app" ]; then
    echo '{no_prior}'
    exit 0
fi
if [ -d "$root/current" ] && diff -r --exclude=.git --exclude=.venv "$root/current" "$app" >/dev/null 2>&1; then
    echo '{up_to_date}'
    exit 0
fi
stage="$root/.staging.$$"
rm -rf "$stage"
mkdir -p "$stage"
(cd "$app" && tar -cf - --exclude='./.git' --exclude='./.venv' .) | (cd "$stage" && tar -xf -) || {{
    echo 'drydock: snapshot copy failed' >&2
    rm -rf "$stage"
    exit 31
}}
if [ -d "$root/current" ]; then
    rm -rf "$root/previous"
    mv "$root/current" "$root/previous"
fi
mv "$stage" "$root/current"
files=$(find "$root/current" -type f | wc -l | tr -d ' ')
echo "{created} files=$files"
"#,
        root = request.install_root,
        app = request.working_dir,
        no_prior = NO_PRIOR_MARKER,
        up_to_date = UP_TO_DATE_MARKER,
        created = CREATED_MARKER,
    )
}

fn restore_script(request: &DeploymentRequest) -> String {
    format!(
        r#"set -u
root='{root}'
app='{app}'
if [ ! -d "$root/current" ]; then
    echo 'drydock: no snapshot to restore' >&2
    exit 70
fi
mkdir -p "$app"
(cd "$root/current" && tar -cf - .) | (cd "$app" && tar -xf -) || {{
    echo 'drydock: restore copy failed' >&2
    exit 71
}}
echo 'drydock: restored snapshot'
"#,
        root = request.install_root,
        app = request.working_dir,
    )
}

/// Rotate the snapshot generations and capture the live tree.
///
/// Running this twice without an intervening deployment is safe: an
/// up-to-date `current/` is detected by content comparison and the
/// older generation is left alone. A missing working tree (first-ever
/// deployment) is a SoftFail with an explicit "no prior version"
/// marker, not an error.
pub async fn rotate_and_backup<C: RemoteChannel + ?Sized>(
    channel: &C,
    request: &DeploymentRequest,
    deadline: Duration,
    poll: &PollConfig,
) -> (StageResult, Option<BackupSnapshot>) {
    let script = rotation_script(request);
    let output = run_script(channel, &request.host, &script, deadline, poll).await;

    if !output.succeeded() {
        let detail = output.failure_detail();
        warn!(host = %request.host, %detail, "backup rotation failed");
        let result = output.into_result(
            StageName::Backup,
            1,
            StageOutcome::HardFail {
                error: DeployError::Backup(detail),
            },
        );
        return (result, None);
    }

    if output.stdout.contains(NO_PRIOR_MARKER) {
        debug!(host = %request.host, "no prior version to back up");
        let result = output.into_result(
            StageName::Backup,
            1,
            StageOutcome::SoftFail {
                warning: "no prior version to back up (first deployment)".to_string(),
            },
        );
        return (result, None);
    }

    let file_count = output
        .stdout
        .lines()
        .find(|line| line.starts_with(CREATED_MARKER))
        .and_then(|line| parse_marker_fields(line).get("files").cloned())
        .and_then(|v| v.parse::<u64>().ok());

    let snapshot = BackupSnapshot {
        generation: SnapshotGeneration::Current,
        created_at: epoch_secs(),
        file_count,
        no_prior_version: false,
    };
    debug!(host = %request.host, files = ?file_count, "snapshot rotated");
    let result = output.into_result(StageName::Backup, 1, StageOutcome::Ok);
    (result, Some(snapshot))
}

/// Restore the newest snapshot over the working tree (rollback). The
/// snapshot in `current/` holds exactly the tree that was live before
/// the failed attempt.
pub async fn restore_snapshot<C: RemoteChannel + ?Sized>(
    channel: &C,
    request: &DeploymentRequest,
    deadline: Duration,
    poll: &PollConfig,
) -> StageResult {
    let script = restore_script(request);
    let output = run_script(channel, &request.host, &script, deadline, poll).await;
    let outcome = if output.succeeded() {
        StageOutcome::Ok
    } else {
        StageOutcome::HardFail {
            error: DeployError::Rollback(format!("restore failed: {}", output.failure_detail())),
        }
    };
    output.into_result(StageName::RollbackRestore, 1, outcome)
}
