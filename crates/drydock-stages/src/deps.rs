//! Reconcile the dependency manifest.
//!
//! Packages install one at a time inside the application-scoped
//! virtual environment; the system package set is never touched. A
//! failing package is reported and tolerated — the stage is Ok or
//! SoftFail, never a hard failure. If the application later fails to
//! start or verify, the accumulated warnings become the probable-cause
//! hint.

use std::time::Duration;

use tracing::{debug, warn};

use drydock_channel::{PollConfig, RemoteChannel};
use drydock_core::{DeploymentRequest, StageName, StageOutcome, StageResult};

use crate::runner::run_script;

const FAILED_MARKER: &str = "drydock: failed ";

fn reconcile_script(request: &DeploymentRequest) -> String {
    format!(
        r#"set -u
app='{app}'
manifest='{manifest}'
cd "$app" || {{ echo "drydock: working tree missing: $app" >&2; exit 50; }}
if [ ! -f "$manifest" ]; then
    echo "drydock: manifest missing: $manifest" >&2
    exit 51
fi
if [ ! -d .venv ]; then
    python3 -m venv .venv || {{ echo 'drydock: venv creation failed' >&2; exit 52; }}
fi
. .venv/bin/activate
failed=0
while IFS= read -r pkg || [ -n "$pkg" ]; do
    case "$pkg" in
        ''|'#'*) continue ;;
    esac
    if pip install --quiet "$pkg" >/dev/null 2>&1; then
        echo "drydock: installed $pkg"
    else
        echo "{failed_marker}$pkg"
        failed=$((failed + 1))
    fi
done < "$manifest"
echo "drydock: reconcile done failures=$failed"
"#,
        app = request.working_dir,
        manifest = request.manifest_path,
        failed_marker = FAILED_MARKER,
    )
}

/// Install the declared packages. Returns Ok, or SoftFail carrying the
/// names of every package that could not be installed.
pub async fn reconcile<C: RemoteChannel + ?Sized>(
    channel: &C,
    request: &DeploymentRequest,
    deadline: Duration,
    poll: &PollConfig,
) -> StageResult {
    let script = reconcile_script(request);
    let output = run_script(channel, &request.host, &script, deadline, poll).await;

    if !output.succeeded() {
        let warning = format!("dependency reconcile did not run: {}", output.failure_detail());
        warn!(host = %request.host, %warning, "dependency stage soft-failed");
        return output.into_result(StageName::Dependencies, 1, StageOutcome::SoftFail { warning });
    }

    let failed: Vec<&str> = output
        .stdout
        .lines()
        .filter_map(|line| line.strip_prefix(FAILED_MARKER))
        .collect();

    let outcome = if failed.is_empty() {
        debug!(host = %request.host, "dependencies reconciled");
        StageOutcome::Ok
    } else {
        let warning = format!("packages failed to install: {}", failed.join(", "));
        warn!(host = %request.host, packages = ?failed, "dependency install failures tolerated");
        StageOutcome::SoftFail { warning }
    };
    output.into_result(StageName::Dependencies, 1, outcome)
}
