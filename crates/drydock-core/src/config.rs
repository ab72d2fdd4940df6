//! drydock.toml configuration parser.
//!
//! One `[environments.<name>]` table per deployable environment. The
//! orchestrator consumes these values; it does not invent paths on the
//! target host.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::types::{DeploymentRequest, Environment};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrydockConfig {
    /// Directory for the attempt store and environment locks.
    pub state_dir: Option<String>,
    /// Directory for the append-only audit trail.
    pub audit_dir: Option<String>,
    pub channel: Option<ChannelConfig>,
    pub poll: Option<PollSettings>,
    pub timeouts: Option<TimeoutsConfig>,
    pub environments: HashMap<String, EnvironmentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Upper bound for a single submitted script.
    pub script_timeout: Option<String>,
}

/// Command polling cadence (backoff between polls).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSettings {
    pub base_interval: Option<String>,
    pub max_interval: Option<String>,
}

/// Per-stage hard deadlines as duration strings ("30s", "500ms", "2m").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    pub connectivity: Option<String>,
    pub backup: Option<String>,
    pub sync: Option<String>,
    pub dependencies: Option<String>,
    pub process: Option<String>,
    pub health: Option<String>,
}

/// Whether a hard failure after host mutation rolls back without
/// asking. `Manual` withholds rollback and terminates the attempt as
/// RollbackFailed so the operator is forced to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    #[default]
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub host: String,
    pub install_root: String,
    pub working_dir: String,
    pub executable: String,
    pub entry_point: String,
    pub manifest: String,
    pub health_endpoint: String,
    pub rollback: Option<RollbackPolicy>,
}

impl DrydockConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: DrydockConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn environment(&self, env: Environment) -> anyhow::Result<&EnvironmentConfig> {
        let key = env.to_string();
        match self.environments.get(&key) {
            Some(cfg) => Ok(cfg),
            None => bail!("config has no [environments.{key}] table"),
        }
    }

    /// Build the immutable request for one deployment of `revision`
    /// into `env`.
    pub fn request_for(&self, env: Environment, revision: &str) -> anyhow::Result<DeploymentRequest> {
        let cfg = self.environment(env)?;
        Ok(DeploymentRequest {
            environment: env,
            host: cfg.host.clone(),
            revision: revision.to_string(),
            executable: cfg.executable.clone(),
            entry_point: cfg.entry_point.clone(),
            install_root: cfg.install_root.clone(),
            working_dir: cfg.working_dir.clone(),
            manifest_path: cfg.manifest.clone(),
            health_endpoint: cfg.health_endpoint.clone(),
        })
    }

    pub fn rollback_policy(&self, env: Environment) -> RollbackPolicy {
        self.environments
            .get(&env.to_string())
            .and_then(|c| c.rollback)
            .unwrap_or_default()
    }
}

impl FromStr for RollbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "automatic" => Ok(RollbackPolicy::Automatic),
            "manual" => Ok(RollbackPolicy::Manual),
            other => Err(format!("unknown rollback policy {other:?}")),
        }
    }
}

/// Parse a duration string like "5s", "500ms", "2m". Plain numbers are
/// seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(rest) = s.strip_suffix("ms") {
        rest.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(rest) = s.strip_suffix('s') {
        rest.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(rest) = s.strip_suffix('m') {
        rest.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Parse an optional duration field, falling back when absent or
/// malformed.
pub fn duration_or(field: Option<&String>, fallback: Duration) -> Duration {
    field
        .and_then(|s| parse_duration(s))
        .unwrap_or(fallback)
}
