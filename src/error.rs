use std::io;
use thiserror::Error;

/// Errors surfaced by the hardware gateway (BMC driver layer).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("hardware call timed out: {0}")]
    Timeout(String),

    #[error("BMC unreachable: {0}")]
    Unreachable(String),

    #[error("BMC authentication failed: {0}")]
    AuthFailure(String),

    #[error("operation not supported by driver: {0}")]
    Unsupported(String),
}

impl GatewayError {
    /// Whether this failure should be counted towards the power-failure
    /// threshold. An unsupported operation will never succeed, so retrying it
    /// into a fault is wasted work.
    pub fn counts_toward_fault(&self) -> bool {
        !matches!(self, GatewayError::Unsupported(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Unreachable(_) => "unreachable",
            GatewayError::AuthFailure(_) => "auth_failure",
            GatewayError::Unsupported(_) => "unsupported",
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum ConductorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Node {0} not found")]
    NodeNotFound(String),

    #[error("Node {node_id} is locked by {holder}")]
    NodeLocked { node_id: String, holder: String },

    #[error("Hardware error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("System error: {0}")]
    System(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("YAML error: {0}")]
    Yaml(String),
}

pub type Result<T> = std::result::Result<T, ConductorError>;

impl ConductorError {
    pub fn config(msg: impl Into<String>) -> Self {
        ConductorError::Config(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        ConductorError::Store(msg.into())
    }

    pub fn notification(msg: impl Into<String>) -> Self {
        ConductorError::Notification(msg.into())
    }

    pub fn system(msg: impl Into<String>) -> Self {
        ConductorError::System(msg.into())
    }
}

impl From<io::Error> for ConductorError {
    fn from(e: io::Error) -> Self {
        ConductorError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ConductorError {
    fn from(e: serde_json::Error) -> Self {
        ConductorError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for ConductorError {
    fn from(e: serde_yaml::Error) -> Self {
        ConductorError::Yaml(e.to_string())
    }
}

impl From<ctrlc::Error> for ConductorError {
    fn from(e: ctrlc::Error) -> Self {
        ConductorError::System(e.to_string())
    }
}
