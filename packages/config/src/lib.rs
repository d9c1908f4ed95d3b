// ABOUTME: Runtime configuration loading and validation for Tether
// ABOUTME: Parses the recognized environment surface into typed config, rejecting bad values up front

pub mod constants;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown sandbox policy: {0} (expected direct, containerized, remote, or auto)")]
    UnknownPolicy(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("Missing required setting: {0}")]
    MissingSetting(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Which execution backend a session should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxPolicy {
    /// Run commands directly on the host in a workspace directory
    Direct,
    /// Run commands inside a local Docker container
    Containerized,
    /// Run commands in a remote ephemeral sandbox service
    Remote,
    /// Route per command text: risky commands escalate to an isolated backend
    Auto,
}

impl std::str::FromStr for SandboxPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "containerized" => Ok(Self::Containerized),
            "remote" => Ok(Self::Remote),
            "auto" => Ok(Self::Auto),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Sandbox lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub policy: SandboxPolicy,
    /// Containerized handles older than this are evicted from the reuse pool
    pub ttl_seconds: u64,
    pub provisioning_timeout_seconds: u64,
    pub provisioning_poll_interval_seconds: u64,
    pub health_probe_timeout_seconds: u64,
    /// Default bound for a single command execution inside a sandbox
    pub command_timeout_seconds: u64,
    pub image: String,
    pub workspace_dir: String,
    pub remote_api_url: Option<String>,
    pub remote_api_key: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            policy: SandboxPolicy::Auto,
            ttl_seconds: 3600,
            provisioning_timeout_seconds: 180,
            provisioning_poll_interval_seconds: 2,
            health_probe_timeout_seconds: 5,
            command_timeout_seconds: 120,
            image: "ubuntu:22.04".to_string(),
            workspace_dir: "/workspace".to_string(),
            remote_api_url: None,
            remote_api_key: None,
        }
    }
}

impl SandboxConfig {
    pub fn provisioning_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioning_timeout_seconds)
    }

    pub fn provisioning_poll_interval(&self) -> Duration {
        Duration::from_secs(self.provisioning_poll_interval_seconds)
    }

    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health_probe_timeout_seconds)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Loop detector thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    pub history_size: usize,
    pub consecutive_threshold: usize,
    pub total_threshold: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            history_size: 10,
            consecutive_threshold: 3,
            total_threshold: 5,
        }
    }
}

/// Status push and heartbeat cadence, in processed events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    pub status_push_interval_events: u64,
    pub heartbeat_interval_events: u64,
    pub coordinator_url: Option<String>,
    pub coordinator_token: Option<String>,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            status_push_interval_events: 10,
            heartbeat_interval_events: 5,
            coordinator_url: None,
            coordinator_token: None,
        }
    }
}

/// Full runtime configuration for one Tether deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub sandbox: SandboxConfig,
    pub loop_detection: LoopConfig,
    pub reporting: ReportingConfig,
}

impl RuntimeConfig {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// Validation happens here, before any side effect: an unrecognized
    /// policy or a non-numeric interval is rejected immediately rather than
    /// surfacing mid-run.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(constants::TETHER_SANDBOX_POLICY) {
            config.sandbox.policy = raw.parse()?;
        }
        if let Some(v) = parse_env(constants::TETHER_SANDBOX_TTL_SECONDS)? {
            config.sandbox.ttl_seconds = v;
        }
        if let Some(v) = parse_env(constants::TETHER_PROVISIONING_TIMEOUT_SECONDS)? {
            config.sandbox.provisioning_timeout_seconds = v;
        }
        if let Some(v) = parse_env(constants::TETHER_PROVISIONING_POLL_INTERVAL_SECONDS)? {
            config.sandbox.provisioning_poll_interval_seconds = v;
        }
        if let Some(v) = parse_env(constants::TETHER_HEALTH_PROBE_TIMEOUT_SECONDS)? {
            config.sandbox.health_probe_timeout_seconds = v;
        }
        if let Some(v) = parse_env(constants::TETHER_COMMAND_TIMEOUT_SECONDS)? {
            config.sandbox.command_timeout_seconds = v;
        }
        if let Ok(image) = std::env::var(constants::TETHER_SANDBOX_IMAGE) {
            config.sandbox.image = image;
        }
        if let Ok(dir) = std::env::var(constants::TETHER_WORKSPACE_DIR) {
            config.sandbox.workspace_dir = dir;
        }
        config.sandbox.remote_api_url = std::env::var(constants::TETHER_REMOTE_API_URL).ok();
        config.sandbox.remote_api_key = std::env::var(constants::TETHER_REMOTE_API_KEY).ok();

        if let Some(v) = parse_env(constants::TETHER_LOOP_HISTORY_SIZE)? {
            config.loop_detection.history_size = v;
        }
        if let Some(v) = parse_env(constants::TETHER_LOOP_CONSECUTIVE_THRESHOLD)? {
            config.loop_detection.consecutive_threshold = v;
        }
        if let Some(v) = parse_env(constants::TETHER_LOOP_TOTAL_THRESHOLD)? {
            config.loop_detection.total_threshold = v;
        }

        if let Some(v) = parse_env(constants::TETHER_STATUS_PUSH_INTERVAL_EVENTS)? {
            config.reporting.status_push_interval_events = v;
        }
        if let Some(v) = parse_env(constants::TETHER_HEARTBEAT_INTERVAL_EVENTS)? {
            config.reporting.heartbeat_interval_events = v;
        }
        config.reporting.coordinator_url = std::env::var(constants::TETHER_COORDINATOR_URL).ok();
        config.reporting.coordinator_token =
            std::env::var(constants::TETHER_COORDINATOR_TOKEN).ok();

        config.validate()?;

        debug!(
            policy = ?config.sandbox.policy,
            "Runtime configuration loaded"
        );
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.sandbox.provisioning_poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                name: constants::TETHER_PROVISIONING_POLL_INTERVAL_SECONDS.to_string(),
                value: "0".to_string(),
            });
        }
        if self.loop_detection.history_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: constants::TETHER_LOOP_HISTORY_SIZE.to_string(),
                value: "0".to_string(),
            });
        }
        if self.loop_detection.total_threshold > self.loop_detection.history_size {
            return Err(ConfigError::InvalidValue {
                name: constants::TETHER_LOOP_TOTAL_THRESHOLD.to_string(),
                value: format!(
                    "{} (exceeds history size {})",
                    self.loop_detection.total_threshold, self.loop_detection.history_size
                ),
            });
        }
        if self.sandbox.policy == SandboxPolicy::Remote && self.sandbox.remote_api_url.is_none() {
            return Err(ConfigError::MissingSetting(
                constants::TETHER_REMOTE_API_URL.to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}
