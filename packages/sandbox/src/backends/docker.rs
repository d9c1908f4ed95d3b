// ABOUTME: Container-isolated execution backend built on local Docker
// ABOUTME: Manages long-lived containers and runs commands through docker exec

use super::SandboxBackend;
use crate::types::{BackendKind, ExecutionConstraints, ExecutionResult};
use crate::Result;
use async_trait::async_trait;
use bollard::{
    container::{Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions},
    exec::{CreateExecOptions, StartExecResults},
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const LABEL_PREFIX: &str = "tether.sandbox";

/// Runs commands inside dedicated Docker containers.
///
/// Each provisioned sandbox is one container kept alive with a parked shell;
/// commands execute through the exec API so filesystem and process state
/// persist across calls within the same sandbox.
pub struct DockerBackend {
    client: Docker,
    image: String,
    workspace_dir: String,
    default_timeout: Duration,
}

impl DockerBackend {
    pub fn new(image: String, workspace_dir: String, default_timeout: Duration) -> Result<Self> {
        let client = Docker::connect_with_defaults()?;
        Ok(Self {
            client,
            image,
            workspace_dir,
            default_timeout,
        })
    }

    pub fn with_client(
        client: Docker,
        image: String,
        workspace_dir: String,
        default_timeout: Duration,
    ) -> Self {
        Self {
            client,
            image,
            workspace_dir,
            default_timeout,
        }
    }

    fn container_config(&self, name: &str) -> Config<String> {
        let labels = HashMap::from([
            (format!("{}.managed", LABEL_PREFIX), "true".to_string()),
            (format!("{}.name", LABEL_PREFIX), name.to_string()),
        ]);

        Config {
            image: Some(self.image.clone()),
            // Parked process keeps the container alive between exec calls
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "sleep infinity".to_string(),
            ]),
            working_dir: Some(self.workspace_dir.clone()),
            labels: Some(labels),
            ..Default::default()
        }
    }
}

#[async_trait]
impl SandboxBackend for DockerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Containerized
    }

    async fn provision(&self) -> Result<String> {
        let name = format!("tether-{}", Uuid::new_v4());
        info!(container = %name, image = %self.image, "Creating sandbox container");

        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };
        let container = self
            .client
            .create_container(Some(options), self.container_config(&name))
            .await?;

        self.client
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await?;

        debug!(container_id = %container.id, "Container started");
        Ok(container.id)
    }

    async fn execute(
        &self,
        resource_id: &str,
        command: &str,
        constraints: &ExecutionConstraints,
    ) -> Result<ExecutionResult> {
        let timeout = constraints.timeout.unwrap_or(self.default_timeout);

        let env: Vec<String> = constraints
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let exec_config = CreateExecOptions {
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                command.to_string(),
            ]),
            env: if env.is_empty() { None } else { Some(env) },
            working_dir: Some(self.workspace_dir.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self.client.create_exec(resource_id, exec_config).await?;
        let start_result = self.client.start_exec(&exec.id, None).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        match start_result {
            StartExecResults::Attached { mut output, .. } => {
                let drained = tokio::time::timeout(timeout, async {
                    while let Some(msg) = output.next().await {
                        match msg {
                            Ok(bollard::container::LogOutput::StdOut { message }) => {
                                stdout.extend_from_slice(&message)
                            }
                            Ok(bollard::container::LogOutput::StdErr { message }) => {
                                stderr.extend_from_slice(&message)
                            }
                            Ok(bollard::container::LogOutput::Console { message }) => {
                                stdout.extend_from_slice(&message)
                            }
                            _ => {}
                        }
                    }
                })
                .await;

                if drained.is_err() {
                    warn!(command, timeout_secs = timeout.as_secs(), "Exec timed out");
                    // The exec process may linger in the container; the next
                    // liveness probe or TTL eviction reclaims it.
                    return Ok(ExecutionResult::timed_out(
                        timeout,
                        String::from_utf8_lossy(&stdout).to_string(),
                        String::from_utf8_lossy(&stderr).to_string(),
                    ));
                }
            }
            StartExecResults::Detached => {
                return Err(crate::SandboxError::Provisioning(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        }

        let exec_inspect = self.client.inspect_exec(&exec.id).await?;

        Ok(ExecutionResult {
            exit_code: exec_inspect.exit_code.unwrap_or(0),
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
        })
    }

    async fn probe(&self, resource_id: &str, timeout: Duration) -> bool {
        let inspect = tokio::time::timeout(timeout, async {
            let state = self
                .client
                .inspect_container(resource_id, None)
                .await
                .ok()?
                .state?;
            if state.running != Some(true) {
                return Some(false);
            }
            // State says running; confirm the container actually answers.
            let result = self
                .execute(
                    resource_id,
                    "echo alive",
                    &ExecutionConstraints::with_timeout(timeout),
                )
                .await
                .ok()?;
            Some(result.success())
        })
        .await;

        matches!(inspect, Ok(Some(true)))
    }

    async fn destroy(&self, resource_id: &str) -> Result<()> {
        info!(container_id = %resource_id, "Removing sandbox container");
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.client
            .remove_container(resource_id, Some(options))
            .await?;
        Ok(())
    }
}
