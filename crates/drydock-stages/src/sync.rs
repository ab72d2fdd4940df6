//! Force the working tree to a source revision.
//!
//! Destructive by design: local drift on the host is never
//! authoritative, so the tree is hard-reset and cleaned. Fails before
//! touching anything when the revision does not resolve or the tree is
//! locked by another process.

use std::time::Duration;

use tracing::debug;

use drydock_channel::{PollConfig, RemoteChannel};
use drydock_core::{DeployError, DeploymentRequest, StageName, StageOutcome, StageResult};

use crate::runner::run_script;

fn sync_script(request: &DeploymentRequest) -> String {
    format!(
        r#"set -u
app='{app}'
rev='{rev}'
cd "$app" || {{ echo "drydock: working tree missing: $app" >&2; exit 40; }}
if [ -e .git/index.lock ]; then
    echo 'drydock: working tree locked by another process' >&2
    exit 41
fi
git fetch --all --prune --quiet || {{ echo 'drydock: fetch failed' >&2; exit 42; }}
target=$(git rev-parse --verify --quiet "origin/$rev") || target=$(git rev-parse --verify --quiet "$rev") || {{
    echo "drydock: cannot resolve revision $rev" >&2
    exit 43
}}
git reset --hard "$target" --quiet
git clean -fdq
echo "drydock: synced rev=$target"
"#,
        app = request.working_dir,
        rev = request.revision,
    )
}

/// Make the working tree exactly match the requested revision.
pub async fn sync_to<C: RemoteChannel + ?Sized>(
    channel: &C,
    request: &DeploymentRequest,
    deadline: Duration,
    poll: &PollConfig,
) -> StageResult {
    let script = sync_script(request);
    let output = run_script(channel, &request.host, &script, deadline, poll).await;
    let outcome = if output.succeeded() {
        debug!(host = %request.host, revision = %request.revision, "working tree synced");
        StageOutcome::Ok
    } else {
        StageOutcome::HardFail {
            error: DeployError::Sync(format!(
                "revision {}: {}",
                request.revision,
                output.failure_detail()
            )),
        }
    };
    output.into_result(StageName::Sync, 1, outcome)
}
