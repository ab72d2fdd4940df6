//! Channel reachability probe.
//!
//! The first stage of every attempt. A failure here means the target
//! was never touched, so the attempt aborts with no rollback.

use std::time::Duration;

use drydock_channel::{PollConfig, RemoteChannel};
use drydock_core::{DeployError, DeploymentRequest, StageName, StageOutcome, StageResult};

use crate::runner::run_script;

fn probe_script() -> String {
    "set -u\necho \"drydock: ping $(uname -n 2>/dev/null || echo unknown)\"\n".to_string()
}

/// Probe the host through the channel. `attempt` numbers the try; the
/// probe is idempotent, so the controller may retry it.
pub async fn check<C: RemoteChannel + ?Sized>(
    channel: &C,
    request: &DeploymentRequest,
    attempt: u32,
    deadline: Duration,
    poll: &PollConfig,
) -> StageResult {
    let output = run_script(channel, &request.host, &probe_script(), deadline, poll).await;
    let outcome = if output.succeeded() {
        StageOutcome::Ok
    } else {
        StageOutcome::HardFail {
            error: DeployError::Connectivity(format!(
                "host {} unreachable: {}",
                request.host,
                output.failure_detail()
            )),
        }
    };
    output.into_result(StageName::Connectivity, attempt, outcome)
}
