//! Deployment controller — drives the attempt state machine.
//!
//! Stages run strictly in order; each one's classification decides
//! whether the attempt proceeds, aborts untouched, or rolls back.
//! Rollback is itself a best-effort stage sequence whose failure is
//! terminal and surfaced, never retried.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use drydock_channel::{PollConfig, RemoteChannel};
use drydock_core::config::TimeoutsConfig;
use drydock_core::{
    AttemptOutcome, AttemptWarning, DeployError, DeploymentAttempt, DeploymentRequest,
    RollbackPolicy, StageName, StageOutcome, StageResult, duration_or, epoch_secs,
};
use drydock_stages::{
    CommandLineMatcher, HealthVerifier, ProcessMatcher, ProcessSupervisor, backup, connectivity,
    deps, sync,
};

use crate::audit::AuditSink;

/// Progress of one attempt through the fixed stage order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptPhase {
    Pending,
    ConnectivityChecked,
    BackedUp,
    Synced,
    DependenciesUpdated,
    ProcessRestarted,
    HealthVerified,
    RollingBack,
    RolledBack,
    RollbackFailed,
}

/// Hard deadlines per stage. Rollback stages reuse the backup deadline
/// for restore and the process deadline for restart.
#[derive(Debug, Clone)]
pub struct StageTimeouts {
    pub connectivity: Duration,
    pub backup: Duration,
    pub sync: Duration,
    pub dependencies: Duration,
    pub process: Duration,
    pub health: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            connectivity: Duration::from_secs(30),
            backup: Duration::from_secs(120),
            sync: Duration::from_secs(120),
            dependencies: Duration::from_secs(300),
            process: Duration::from_secs(90),
            health: Duration::from_secs(60),
        }
    }
}

impl StageTimeouts {
    pub fn from_config(config: Option<&TimeoutsConfig>) -> Self {
        let defaults = Self::default();
        let Some(cfg) = config else {
            return defaults;
        };
        Self {
            connectivity: duration_or(cfg.connectivity.as_ref(), defaults.connectivity),
            backup: duration_or(cfg.backup.as_ref(), defaults.backup),
            sync: duration_or(cfg.sync.as_ref(), defaults.sync),
            dependencies: duration_or(cfg.dependencies.as_ref(), defaults.dependencies),
            process: duration_or(cfg.process.as_ref(), defaults.process),
            health: duration_or(cfg.health.as_ref(), defaults.health),
        }
    }
}

/// Controller tunables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub poll: PollConfig,
    pub timeouts: StageTimeouts,
    pub rollback_policy: RollbackPolicy,
    /// The connectivity probe is idempotent; it alone may retry.
    pub connectivity_retries: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            timeouts: StageTimeouts::default(),
            rollback_policy: RollbackPolicy::Automatic,
            connectivity_retries: 2,
        }
    }
}

/// Sequences one deployment attempt per request. Assumes the caller
/// holds the environment lock: within an attempt this controller is
/// the sole writer to the host's backup and process state.
pub struct DeploymentController<C: RemoteChannel, A: AuditSink> {
    channel: C,
    audit: A,
    config: ControllerConfig,
    supervisor: ProcessSupervisor,
    verifier: HealthVerifier,
    matcher: Option<Box<dyn ProcessMatcher>>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<C: RemoteChannel, A: AuditSink> DeploymentController<C, A> {
    pub fn new(channel: C, audit: A, config: ControllerConfig) -> Self {
        Self {
            channel,
            audit,
            config,
            supervisor: ProcessSupervisor::default(),
            verifier: HealthVerifier::default(),
            matcher: None,
            cancel: None,
        }
    }

    /// Substitute the process identification strategy.
    pub fn with_matcher(mut self, matcher: Box<dyn ProcessMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn with_supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_verifier(mut self, verifier: HealthVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    /// Observe a cancellation flag. Honored at stage boundaries
    /// strictly before process restart; ignored afterwards.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Run one deployment attempt to its terminal outcome. Every
    /// failure lands in the returned attempt; this call itself does
    /// not fail.
    pub async fn deploy(&mut self, request: &DeploymentRequest) -> DeploymentAttempt {
        let default_matcher;
        let matcher: &dyn ProcessMatcher = match self.matcher.as_deref() {
            Some(m) => m,
            None => {
                default_matcher = CommandLineMatcher::from_request(request);
                &default_matcher
            }
        };

        let run = AttemptRun {
            channel: &self.channel,
            audit: &mut self.audit,
            config: &self.config,
            supervisor: &self.supervisor,
            verifier: &self.verifier,
            matcher,
            cancel: self.cancel.clone(),
            request,
            attempt: DeploymentAttempt::begin(request),
            phase: AttemptPhase::Pending,
        };
        run.run().await
    }
}

/// Per-attempt execution state, split out so stage pushes (which need
/// the audit sink mutably) and stage calls (which borrow the channel
/// and components) do not fight over the controller.
struct AttemptRun<'a, C: RemoteChannel, A: AuditSink> {
    channel: &'a C,
    audit: &'a mut A,
    config: &'a ControllerConfig,
    supervisor: &'a ProcessSupervisor,
    verifier: &'a HealthVerifier,
    matcher: &'a dyn ProcessMatcher,
    cancel: Option<watch::Receiver<bool>>,
    request: &'a DeploymentRequest,
    attempt: DeploymentAttempt,
    phase: AttemptPhase,
}

impl<C: RemoteChannel, A: AuditSink> AttemptRun<'_, C, A> {
    async fn run(mut self) -> DeploymentAttempt {
        info!(
            attempt_id = %self.attempt.id,
            environment = %self.request.environment,
            revision = %self.request.revision,
            host = %self.request.host,
            "deployment attempt started"
        );

        // ── Connectivity ───────────────────────────────────────────
        let timeouts = self.config.timeouts.clone();
        let retries = self.config.connectivity_retries.max(1);
        let mut result = connectivity::check(
            self.channel,
            self.request,
            1,
            timeouts.connectivity,
            &self.config.poll,
        )
        .await;
        let mut try_no = 1;
        while result.outcome.is_hard_fail() && try_no < retries {
            self.push(result);
            try_no += 1;
            debug!(attempt_id = %self.attempt.id, try_no, "retrying connectivity probe");
            result = connectivity::check(
                self.channel,
                self.request,
                try_no,
                timeouts.connectivity,
                &self.config.poll,
            )
            .await;
        }
        if let Some(error) = self.push(result) {
            // Nothing was changed on the host; no rollback.
            return self.finish(AttemptOutcome::Failed {
                reason: error.to_string(),
            });
        }
        self.advance(AttemptPhase::ConnectivityChecked);

        // ── Backup ─────────────────────────────────────────────────
        if let Some(outcome) = self.cancelled_before(StageName::Backup) {
            return self.finish(outcome);
        }
        let (result, _snapshot) = backup::rotate_and_backup(
            self.channel,
            self.request,
            timeouts.backup,
            &self.config.poll,
        )
        .await;
        if let Some(error) = self.push(result) {
            return self.finish(AttemptOutcome::Failed {
                reason: error.to_string(),
            });
        }
        self.advance(AttemptPhase::BackedUp);

        // ── Sync ───────────────────────────────────────────────────
        if let Some(outcome) = self.cancelled_before(StageName::Sync) {
            return self.finish(outcome);
        }
        let result =
            sync::sync_to(self.channel, self.request, timeouts.sync, &self.config.poll).await;
        if let Some(error) = self.push(result) {
            // The working tree was not reset; pre-deployment state is
            // untouched and the running process was never stopped.
            return self.finish(AttemptOutcome::Failed {
                reason: error.to_string(),
            });
        }
        self.advance(AttemptPhase::Synced);

        // ── Dependencies ───────────────────────────────────────────
        if let Some(outcome) = self.cancelled_before(StageName::Dependencies) {
            return self.finish(outcome);
        }
        let result = deps::reconcile(
            self.channel,
            self.request,
            timeouts.dependencies,
            &self.config.poll,
        )
        .await;
        self.push(result);
        self.advance(AttemptPhase::DependenciesUpdated);

        // ── Process restart ────────────────────────────────────────
        // Last cancellation point: once stop begins the attempt must
        // run to ProcessRestarted or rollback, never leaving the
        // application stopped with no completion path.
        if let Some(outcome) = self.cancelled_before(StageName::ProcessRestart) {
            return self.finish(outcome);
        }
        let mut restart = self
            .supervisor
            .restart(
                self.channel,
                self.request,
                self.matcher,
                StageName::ProcessRestart,
                timeouts.process,
                &self.config.poll,
            )
            .await;
        // A start failure after tolerated dependency failures is most
        // likely the dependency's fault; escalate the classification.
        let process_failure = match &restart.result.outcome {
            StageOutcome::HardFail {
                error: DeployError::Process(detail),
            } => Some(detail.clone()),
            _ => None,
        };
        if let Some(detail) = process_failure {
            let dep_warnings = self.dependency_warnings();
            if !dep_warnings.is_empty() {
                restart.result.outcome = StageOutcome::HardFail {
                    error: DeployError::Dependency(format!(
                        "{detail}; probable cause: {dep_warnings}"
                    )),
                };
            }
        }
        if let Some(error) = self.push(restart.result) {
            return self.roll_back(error).await;
        }
        self.advance(AttemptPhase::ProcessRestarted);

        // ── Health ─────────────────────────────────────────────────
        let result = self.verifier.verify(self.request, timeouts.health).await;
        if let Some(error) = self.push(result) {
            let dep_warnings = self.dependency_warnings();
            if !dep_warnings.is_empty() {
                self.attempt.warnings.push(AttemptWarning {
                    stage: StageName::Health,
                    message: format!("probable cause: {dep_warnings}"),
                });
            }
            return self.roll_back(error).await;
        }
        self.advance(AttemptPhase::HealthVerified);

        self.finish(AttemptOutcome::Success)
    }

    /// Best-effort rollback: restore the snapshot, restart the prior
    /// version. Its own failure is terminal and reported distinctly
    /// from the original failure.
    async fn roll_back(mut self, original: DeployError) -> DeploymentAttempt {
        self.advance(AttemptPhase::RollingBack);
        warn!(
            attempt_id = %self.attempt.id,
            error = %original,
            "hard failure after host mutation, rolling back"
        );

        if self.config.rollback_policy == RollbackPolicy::Manual {
            let reason = format!(
                "{original}; rollback withheld by policy, operator action required"
            );
            warn!(attempt_id = %self.attempt.id, "rollback withheld by policy");
            self.advance(AttemptPhase::RollbackFailed);
            return self.finish(AttemptOutcome::RollbackFailed { reason });
        }

        let timeouts = self.config.timeouts.clone();
        let result = backup::restore_snapshot(
            self.channel,
            self.request,
            timeouts.backup,
            &self.config.poll,
        )
        .await;
        if let Some(error) = self.push(result) {
            self.advance(AttemptPhase::RollbackFailed);
            return self.finish(AttemptOutcome::RollbackFailed {
                reason: format!("{original}; {error}"),
            });
        }

        let restart = self
            .supervisor
            .restart(
                self.channel,
                self.request,
                self.matcher,
                StageName::RollbackRestart,
                timeouts.process,
                &self.config.poll,
            )
            .await;
        if let Some(error) = self.push(restart.result) {
            self.advance(AttemptPhase::RollbackFailed);
            return self.finish(AttemptOutcome::RollbackFailed {
                reason: format!("{original}; {error}"),
            });
        }

        self.advance(AttemptPhase::RolledBack);
        self.finish(AttemptOutcome::RolledBack {
            reason: original.to_string(),
        })
    }

    /// Append a stage result: accumulate soft-failure warnings, write
    /// the audit record, and hand back the error if the stage hard-
    /// failed. Audit write failures are surfaced as warnings rather
    /// than aborting — once the host is being mutated, finishing the
    /// state machine outranks the trail.
    fn push(&mut self, result: StageResult) -> Option<DeployError> {
        if let StageOutcome::SoftFail { warning } = &result.outcome {
            self.attempt.warnings.push(AttemptWarning {
                stage: result.stage,
                message: warning.clone(),
            });
        }
        let error = match &result.outcome {
            StageOutcome::HardFail { error } => Some(error.clone()),
            _ => None,
        };

        info!(
            attempt_id = %self.attempt.id,
            stage = %result.stage,
            outcome = result.outcome.label(),
            duration_ms = result.duration_ms,
            "stage finished"
        );

        if let Err(e) = self.audit.record_stage(&self.attempt, &result) {
            tracing::error!(attempt_id = %self.attempt.id, error = %e, "audit write failed");
            self.attempt.warnings.push(AttemptWarning {
                stage: result.stage,
                message: format!("audit write failed: {e}"),
            });
        }
        self.attempt.stages.push(result);
        error
    }

    fn finish(mut self, outcome: AttemptOutcome) -> DeploymentAttempt {
        self.attempt.finished_at = epoch_secs();
        self.attempt.outcome = outcome;
        if let Err(e) = self.audit.record_outcome(&self.attempt) {
            tracing::error!(attempt_id = %self.attempt.id, error = %e, "audit outcome write failed");
        }
        info!(
            attempt_id = %self.attempt.id,
            outcome = self.attempt.outcome.label(),
            stages = self.attempt.stages.len(),
            warnings = self.attempt.warnings.len(),
            "deployment attempt finished"
        );
        self.attempt
    }

    fn advance(&mut self, next: AttemptPhase) {
        debug!(
            attempt_id = %self.attempt.id,
            from = ?self.phase,
            to = ?next,
            "phase transition"
        );
        self.phase = next;
    }

    /// Cancellation checkpoint. Only called before stages that precede
    /// process restart.
    fn cancelled_before(&self, stage: StageName) -> Option<AttemptOutcome> {
        let cancelled = self
            .cancel
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false);
        if cancelled {
            info!(
                attempt_id = %self.attempt.id,
                before_stage = %stage,
                "attempt cancelled"
            );
            Some(AttemptOutcome::Failed {
                reason: format!("cancelled before {stage}"),
            })
        } else {
            None
        }
    }

    fn dependency_warnings(&self) -> String {
        self.attempt
            .warnings_for(StageName::Dependencies)
            .iter()
            .map(|w| w.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}
