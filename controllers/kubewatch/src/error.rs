//! Controller-specific error types.
//!
//! Engine failures arrive as [`EngineError`]; everything else that can stop
//! the process (configuration, the Kubernetes client, the health listener)
//! is collected here.

use kube::Error as KubeError;
use thiserror::Error;
use watch_engine::EngineError;

/// Errors that can occur in the kubewatch controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Watch engine error
    #[error("Watch engine error: {0}")]
    Engine(#[from] EngineError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A per-kind watch task stopped unexpectedly
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Health/metrics listener error
    #[error("HTTP server error: {0}")]
    Http(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
