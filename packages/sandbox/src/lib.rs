// ABOUTME: Sandbox lifecycle management for agent command execution
// ABOUTME: Uniform execution capability over direct, containerized, and remote backends

pub mod backends;
pub mod manager;
pub mod routing;
pub mod types;

pub use backends::{direct::DirectBackend, docker::DockerBackend, remote::RemoteBackend};
pub use backends::SandboxBackend;
pub use manager::SandboxManager;
pub use routing::{route, CommandRoute};
pub use types::{
    BackendKind, ExecutionConstraints, ExecutionResult, SandboxHandle, SandboxState,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Remote sandbox service error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No backend registered for kind: {0:?}")]
    BackendUnavailable(types::BackendKind),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
