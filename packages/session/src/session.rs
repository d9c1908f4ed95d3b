// ABOUTME: Execution session lifecycle for a single agent run
// ABOUTME: Feeds events through aggregation and loop detection while owning the sandbox

use crate::coordinator::{Coordinator, StatusDispatcher};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tether_loopguard::{Intervention, LoopDetector};
use tether_sandbox::{
    ExecutionConstraints, ExecutionResult, SandboxError, SandboxHandle, SandboxManager,
};
use tether_status::{AgentEvent, ExecutionPhase, StatusAggregator, StatusSnapshot};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

const DISPATCH_QUEUE_CAPACITY: usize = 32;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid session parameters: {0}")]
    Validation(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Config(#[from] tether_config::ConfigError),
}

/// One agent run from sandbox acquisition to terminal status.
///
/// Every event feeds the status aggregator; tool starts additionally feed the
/// loop detector, whose interventions are forwarded to the caller's channel
/// for injection into the agent conversation. Status pushes happen on an
/// event-count cadence and never block event processing.
pub struct ExecutionSession {
    execution_id: String,
    aggregator: StatusAggregator,
    detector: LoopDetector,
    manager: Arc<SandboxManager>,
    sandbox: Option<SandboxHandle>,
    dispatcher: Option<StatusDispatcher>,
    reporting: tether_config::ReportingConfig,
    intervention_tx: Option<mpsc::Sender<Intervention>>,
}

impl ExecutionSession {
    /// Acquire the run's sandbox and begin reporting.
    ///
    /// The session key identifies a multi-turn conversation: runs sharing a
    /// key get the same pooled sandbox back turn after turn. Runs without a
    /// key get an ephemeral sandbox destroyed at session end.
    pub async fn start(
        execution_id: impl Into<String>,
        session_key: Option<&str>,
        config: &tether_config::RuntimeConfig,
        manager: Arc<SandboxManager>,
        coordinator: Option<Arc<dyn Coordinator>>,
        intervention_tx: Option<mpsc::Sender<Intervention>>,
    ) -> Result<Self, SessionError> {
        let execution_id = execution_id.into();
        if execution_id.trim().is_empty() {
            return Err(SessionError::Validation(
                "execution id must not be empty".to_string(),
            ));
        }

        let sandbox = manager
            .acquire(session_key, config.sandbox.policy, None)
            .await?;
        info!(execution_id = %execution_id, sandbox_id = %sandbox.id, "Session started");

        let dispatcher = coordinator.map(|coordinator| {
            StatusDispatcher::spawn(coordinator, execution_id.clone(), DISPATCH_QUEUE_CAPACITY)
        });

        let mut aggregator = StatusAggregator::new(execution_id.clone());
        aggregator.set_phase(ExecutionPhase::InProgress);

        let session = Self {
            execution_id,
            aggregator,
            detector: LoopDetector::new(config.loop_detection.clone()),
            manager,
            sandbox: Some(sandbox),
            dispatcher,
            reporting: config.reporting.clone(),
            intervention_tx,
        };
        session.push_status();
        Ok(session)
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn sandbox(&self) -> Option<&SandboxHandle> {
        self.sandbox.as_ref()
    }

    /// An owned copy of the current status projection, readable mid-run
    /// without pausing event consumption.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.aggregator.snapshot()
    }

    /// Feed one event from the agent stream.
    pub fn handle_event(&mut self, event: &AgentEvent) {
        self.aggregator.process(event);

        if let Some((name, args)) = event.as_tool_start() {
            if let Some(intervention) = self.detector.observe(name, args) {
                warn!(
                    execution_id = %self.execution_id,
                    tool = %intervention.tool_name,
                    severity = ?intervention.severity,
                    "Loop intervention issued"
                );
                self.forward_intervention(intervention);
            }
        }

        let processed = self.aggregator.events_processed();
        if self.reporting.status_push_interval_events > 0
            && processed % self.reporting.status_push_interval_events == 0
        {
            self.push_status();
        }
        if self.reporting.heartbeat_interval_events > 0
            && processed % self.reporting.heartbeat_interval_events == 0
        {
            self.push_heartbeat();
        }
    }

    /// Drain an event stream to completion.
    pub async fn consume<S>(&mut self, mut stream: S)
    where
        S: Stream<Item = AgentEvent> + Unpin,
    {
        while let Some(event) = stream.next().await {
            self.handle_event(&event);
        }
    }

    /// Run a command in this session's sandbox.
    pub async fn run_command(
        &self,
        command: &str,
        constraints: &ExecutionConstraints,
    ) -> Result<ExecutionResult, SessionError> {
        let sandbox = self.sandbox.as_ref().ok_or_else(|| {
            SessionError::Validation("session has no sandbox".to_string())
        })?;
        Ok(self.manager.execute(sandbox, command, constraints).await?)
    }

    /// Record a run-level failure. The phase moves to FAILED immediately and
    /// stays terminal; later events still aggregate for diagnostics.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.aggregator.set_error(message);
        self.aggregator.set_phase(ExecutionPhase::Failed);
    }

    /// Close the session normally and return the terminal snapshot.
    ///
    /// A stream that produced no events is a failed run: the agent engine
    /// always emits at least one event on a healthy run.
    pub async fn finalize(mut self) -> StatusSnapshot {
        if self.aggregator.events_processed() == 0 {
            self.aggregator
                .set_error("Agent stream produced no events");
            self.aggregator.set_phase(ExecutionPhase::Failed);
        } else if !self.aggregator.phase().is_terminal() {
            self.aggregator.set_phase(ExecutionPhase::Completed);
        }

        self.detector.log_summary();
        self.close().await
    }

    /// Abort the session. The run is marked failed; a keyed sandbox stays
    /// pooled so a retry resumes with the same environment, while an unkeyed
    /// one is torn down with the session.
    pub async fn cancel(mut self) -> StatusSnapshot {
        info!(execution_id = %self.execution_id, "Session cancelled");
        self.aggregator.set_error("Execution cancelled");
        self.aggregator.set_phase(ExecutionPhase::Failed);
        self.close().await
    }

    async fn close(mut self) -> StatusSnapshot {
        if let Some(sandbox) = self.sandbox.take() {
            if let Err(e) = self.manager.release(sandbox).await {
                warn!(execution_id = %self.execution_id, error = %e, "Sandbox release failed");
            }
        }

        let snapshot = self.aggregator.snapshot();
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.push_status_final(snapshot.clone()).await;
        }
        snapshot
    }

    fn forward_intervention(&self, intervention: Intervention) {
        if let Some(tx) = &self.intervention_tx {
            if tx.try_send(intervention).is_err() {
                warn!(
                    execution_id = %self.execution_id,
                    "Intervention channel full or closed; intervention dropped"
                );
            }
        }
    }

    fn push_status(&self) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.push_status(self.aggregator.snapshot());
        }
    }

    fn push_heartbeat(&self) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.push_heartbeat(self.aggregator.progress());
        }
    }
}
