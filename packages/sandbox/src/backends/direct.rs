// ABOUTME: Direct host execution backend for low-risk commands
// ABOUTME: Runs commands in a per-sandbox workspace directory with bounded timeouts

use super::SandboxBackend;
use crate::types::{BackendKind, ExecutionConstraints, ExecutionResult};
use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Executes commands directly on the host, scoped to a workspace directory.
///
/// Commands inherit the parent environment so credentials pass through.
/// There is no isolation here; the AUTO policy routes risky commands away
/// from this backend, and callers wanting a guarantee pin an isolated one.
pub struct DirectBackend {
    workspace_root: PathBuf,
    default_timeout: Duration,
}

impl DirectBackend {
    pub fn new(workspace_root: impl Into<PathBuf>, default_timeout: Duration) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            default_timeout,
        }
    }
}

#[async_trait]
impl SandboxBackend for DirectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Direct
    }

    async fn provision(&self) -> Result<String> {
        let workspace = self.workspace_root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&workspace).await?;
        debug!(workspace = %workspace.display(), "Provisioned direct workspace");
        Ok(workspace.to_string_lossy().to_string())
    }

    async fn execute(
        &self,
        resource_id: &str,
        command: &str,
        constraints: &ExecutionConstraints,
    ) -> Result<ExecutionResult> {
        let timeout = constraints.timeout.unwrap_or(self.default_timeout);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(resource_id)
            .envs(&constraints.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                // Spawn failure is captured as a result, mirroring in-sandbox
                // command failure semantics.
                return Ok(ExecutionResult {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: format!("Command execution failed: {}", e),
                });
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ExecutionResult {
                exit_code: output.status.code().unwrap_or(1) as i64,
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
            Ok(Err(e)) => Ok(ExecutionResult {
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("Command execution failed: {}", e),
            }),
            Err(_) => {
                warn!(command, timeout_secs = timeout.as_secs(), "Command timed out");
                Ok(ExecutionResult::timed_out(
                    timeout,
                    String::new(),
                    String::new(),
                ))
            }
        }
    }

    async fn probe(&self, resource_id: &str, _timeout: Duration) -> bool {
        Path::new(resource_id).is_dir()
    }

    async fn destroy(&self, resource_id: &str) -> Result<()> {
        // Only remove directories we created under the workspace root.
        if Path::new(resource_id).starts_with(&self.workspace_root) {
            tokio::fs::remove_dir_all(resource_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn backend(root: &TempDir) -> DirectBackend {
        DirectBackend::new(root.path(), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_execute_captures_stdout() {
        let root = TempDir::new().unwrap();
        let backend = backend(&root);
        let workspace = backend.provision().await.unwrap();

        let result = backend
            .execute(&workspace, "echo hello", &ExecutionConstraints::default())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_failure_is_structured_result() {
        let root = TempDir::new().unwrap();
        let backend = backend(&root);
        let workspace = backend.provision().await.unwrap();

        let result = backend
            .execute(&workspace, "exit 3", &ExecutionConstraints::default())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_exit_124() {
        let root = TempDir::new().unwrap();
        let backend = backend(&root);
        let workspace = backend.provision().await.unwrap();

        let result = backend
            .execute(
                &workspace,
                "sleep 5",
                &ExecutionConstraints::with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code, crate::types::TIMEOUT_EXIT_CODE);
        assert!(result.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn test_commands_run_in_workspace() {
        let root = TempDir::new().unwrap();
        let backend = backend(&root);
        let workspace = backend.provision().await.unwrap();

        backend
            .execute(&workspace, "touch marker", &ExecutionConstraints::default())
            .await
            .unwrap();
        assert!(Path::new(&workspace).join("marker").exists());
    }

    #[tokio::test]
    async fn test_probe_and_destroy() {
        let root = TempDir::new().unwrap();
        let backend = backend(&root);
        let workspace = backend.provision().await.unwrap();

        assert!(backend.probe(&workspace, Duration::from_secs(1)).await);
        backend.destroy(&workspace).await.unwrap();
        assert!(!backend.probe(&workspace, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_extra_env_passed_through() {
        let root = TempDir::new().unwrap();
        let backend = backend(&root);
        let workspace = backend.provision().await.unwrap();

        let mut constraints = ExecutionConstraints::default();
        constraints
            .env
            .insert("TETHER_TEST_VAR".to_string(), "42".to_string());
        let result = backend
            .execute(&workspace, "echo $TETHER_TEST_VAR", &constraints)
            .await
            .unwrap();
        assert_eq!(result.stdout.trim(), "42");
    }
}
