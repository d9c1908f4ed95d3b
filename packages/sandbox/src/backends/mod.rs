// ABOUTME: Backend trait for sandbox execution environments
// ABOUTME: Small provisioning/execution/probe/destroy interface implemented per backend kind

use crate::types::{BackendKind, ExecutionConstraints, ExecutionResult};
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

pub mod direct;
pub mod docker;
pub mod remote;

/// An execution backend. Selected once at handle acquisition; the manager
/// never re-inspects the kind per call.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Create the backing resource and return its backend-native id.
    ///
    /// Provisioning may complete asynchronously; the manager polls
    /// [`probe`](Self::probe) until the resource is ready or a bounded
    /// timeout elapses.
    async fn provision(&self) -> Result<String>;

    /// Run one command inside the resource. Execution failure (non-zero
    /// exit, timeout) is a structured result, not an error.
    async fn execute(
        &self,
        resource_id: &str,
        command: &str,
        constraints: &ExecutionConstraints,
    ) -> Result<ExecutionResult>;

    /// Cheap bounded liveness check.
    async fn probe(&self, resource_id: &str, timeout: Duration) -> bool;

    /// Tear the resource down. Best effort; errors are for logging.
    async fn destroy(&self, resource_id: &str) -> Result<()>;
}
