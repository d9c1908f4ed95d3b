// ABOUTME: Core type definitions for sandbox execution
// ABOUTME: Handles, backend kinds, lifecycle states, and structured command results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Exit code reported when a command exceeds its execution bound,
/// matching the conventional shell timeout exit status.
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// Which execution backend a handle is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Commands run directly on the host in a workspace directory
    Direct,
    /// Commands run inside a local Docker container
    Containerized,
    /// Commands run in a remote ephemeral sandbox service
    Remote,
}

/// Sandbox lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    Provisioning,
    Ready,
    Dead,
}

/// Reference to a provisioned execution environment.
///
/// Owned by the session that acquired it; released back to the reuse pool
/// (when keyed to a session) or destroyed at session end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxHandle {
    /// Opaque handle id
    pub id: String,
    pub kind: BackendKind,
    pub state: SandboxState,
    /// Backend-native resource id: container id, remote sandbox id, or
    /// workspace directory path for direct execution
    pub resource_id: String,
    /// Session key this handle is pooled under, if any
    pub session_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_probe_at: Option<DateTime<Utc>>,
}

impl SandboxHandle {
    /// Age of the handle since provisioning.
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.created_at)
    }
}

/// Bounds applied to a single command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionConstraints {
    /// Maximum wall-clock time; the configured default applies when unset
    pub timeout: Option<Duration>,
    /// Extra environment variables for this command
    pub env: HashMap<String, String>,
}

impl ExecutionConstraints {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }
}

/// Structured result of a command run inside a sandbox.
///
/// Command failure is data, not an error: a non-zero exit code with stderr
/// populated is returned normally and the caller decides what is fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Result representing a command that exceeded its execution bound.
    pub fn timed_out(timeout: Duration, partial_stdout: String, partial_stderr: String) -> Self {
        let diagnostic = format!("Command timed out after {} seconds", timeout.as_secs());
        let stderr = if partial_stderr.is_empty() {
            diagnostic
        } else {
            format!("{}\n{}", partial_stderr, diagnostic)
        };
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: partial_stdout,
            stderr,
        }
    }
}
