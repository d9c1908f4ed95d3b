// ABOUTME: Status and heartbeat delivery to the run coordinator service
// ABOUTME: Bounded background dispatcher so slow delivery never stalls event processing

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tether_status::{ProgressCounters, StatusSnapshot};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Coordinator request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Receives status snapshots and liveness heartbeats for a run.
#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn update_status(
        &self,
        execution_id: &str,
        snapshot: &StatusSnapshot,
    ) -> Result<(), CoordinatorError>;

    async fn heartbeat(
        &self,
        execution_id: &str,
        progress: &ProgressCounters,
    ) -> Result<(), CoordinatorError>;
}

/// Posts status and heartbeats to the coordinator's HTTP API.
pub struct HttpCoordinator {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpCoordinator {
    pub fn new(base_url: String, token: Option<String>) -> Result<Self, CoordinatorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl Coordinator for HttpCoordinator {
    async fn update_status(
        &self,
        execution_id: &str,
        snapshot: &StatusSnapshot,
    ) -> Result<(), CoordinatorError> {
        self.request(&format!("/v1/executions/{}/status", execution_id))
            .json(snapshot)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn heartbeat(
        &self,
        execution_id: &str,
        progress: &ProgressCounters,
    ) -> Result<(), CoordinatorError> {
        self.request(&format!("/v1/executions/{}/heartbeat", execution_id))
            .json(progress)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

enum PushMessage {
    Status(StatusSnapshot),
    Heartbeat(ProgressCounters),
}

/// Hands pushes to a background worker over a bounded channel.
///
/// When the channel is full the push is dropped with a warning; the next
/// snapshot supersedes it anyway, so losing one is harmless while blocking
/// the event loop is not.
pub struct StatusDispatcher {
    tx: mpsc::Sender<PushMessage>,
}

impl StatusDispatcher {
    pub fn spawn(coordinator: Arc<dyn Coordinator>, execution_id: String, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<PushMessage>(capacity);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let result = match &message {
                    PushMessage::Status(snapshot) => {
                        coordinator.update_status(&execution_id, snapshot).await
                    }
                    PushMessage::Heartbeat(progress) => {
                        coordinator.heartbeat(&execution_id, progress).await
                    }
                };
                if let Err(e) = result {
                    warn!(execution_id = %execution_id, error = %e, "Coordinator push failed");
                }
            }
            debug!(execution_id = %execution_id, "Status dispatcher stopped");
        });

        Self { tx }
    }

    pub fn push_status(&self, snapshot: StatusSnapshot) {
        if self.tx.try_send(PushMessage::Status(snapshot)).is_err() {
            warn!("Status push queue full; dropping snapshot");
        }
    }

    pub fn push_heartbeat(&self, progress: ProgressCounters) {
        if self.tx.try_send(PushMessage::Heartbeat(progress)).is_err() {
            warn!("Status push queue full; dropping heartbeat");
        }
    }

    /// Deliver a final snapshot, waiting for queue space. Used at session end
    /// where losing the terminal state would leave the coordinator stale.
    pub async fn push_status_final(&self, snapshot: StatusSnapshot) {
        if self.tx.send(PushMessage::Status(snapshot)).await.is_err() {
            warn!("Status dispatcher already stopped; final snapshot not delivered");
        }
    }
}
