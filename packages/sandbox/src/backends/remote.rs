// ABOUTME: Remote sandbox backend talking to a hosted sandbox provider API
// ABOUTME: Provisions, executes against, probes, and tears down remote sandboxes over HTTP

use super::SandboxBackend;
use crate::types::{BackendKind, ExecutionConstraints, ExecutionResult};
use crate::{Result, SandboxError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct CreateSandboxRequest<'a> {
    image: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateSandboxResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct ExecRequest<'a> {
    command: &'a str,
    timeout_seconds: u64,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty")]
    env: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ExecResponse {
    exit_code: i64,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
}

#[derive(Debug, Deserialize)]
struct SandboxStatusResponse {
    status: String,
}

/// Executes commands in sandboxes hosted by a remote provider.
///
/// Provisioning returns the provider's sandbox id; all later calls address
/// that id. Command timeouts are enforced by the provider, with the HTTP
/// client timeout as a backstop.
pub struct RemoteBackend {
    client: Client,
    base_url: String,
    api_key: String,
    default_timeout: Duration,
}

impl RemoteBackend {
    pub fn new(base_url: String, api_key: String, default_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            default_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl SandboxBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn provision(&self) -> Result<String> {
        info!(base_url = %self.base_url, "Requesting remote sandbox");

        let response = self
            .client
            .post(self.url("/v1/sandboxes"))
            .bearer_auth(&self.api_key)
            .json(&CreateSandboxRequest { image: "default" })
            .send()
            .await?
            .error_for_status()?;

        let created: CreateSandboxResponse = response.json().await?;
        debug!(sandbox_id = %created.id, "Remote sandbox requested");
        Ok(created.id)
    }

    async fn execute(
        &self,
        resource_id: &str,
        command: &str,
        constraints: &ExecutionConstraints,
    ) -> Result<ExecutionResult> {
        let timeout = constraints.timeout.unwrap_or(self.default_timeout);

        let request = ExecRequest {
            command,
            timeout_seconds: timeout.as_secs(),
            env: constraints.env.clone(),
        };

        // The client-side bound leaves headroom over the provider's bound so
        // the provider reports the timeout result itself when possible.
        let result = self
            .client
            .post(self.url(&format!("/v1/sandboxes/{}/exec", resource_id)))
            .bearer_auth(&self.api_key)
            .timeout(timeout + Duration::from_secs(30))
            .json(&request)
            .send()
            .await;

        let response = match result {
            Ok(response) => response.error_for_status()?,
            Err(e) if e.is_timeout() => {
                warn!(command, timeout_secs = timeout.as_secs(), "Remote exec timed out");
                return Ok(ExecutionResult::timed_out(
                    timeout,
                    String::new(),
                    String::new(),
                ));
            }
            Err(e) => return Err(SandboxError::Http(e)),
        };

        let exec: ExecResponse = response.json().await?;
        Ok(ExecutionResult {
            exit_code: exec.exit_code,
            stdout: exec.stdout,
            stderr: exec.stderr,
        })
    }

    async fn probe(&self, resource_id: &str, timeout: Duration) -> bool {
        let request = self
            .client
            .get(self.url(&format!("/v1/sandboxes/{}", resource_id)))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .send()
            .await;

        match request {
            Ok(response) if response.status().is_success() => {
                match response.json::<SandboxStatusResponse>().await {
                    Ok(status) => status.status == "running" || status.status == "started",
                    Err(_) => false,
                }
            }
            _ => false,
        }
    }

    async fn destroy(&self, resource_id: &str) -> Result<()> {
        info!(sandbox_id = %resource_id, "Deleting remote sandbox");
        self.client
            .delete(self.url(&format!("/v1/sandboxes/{}", resource_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
