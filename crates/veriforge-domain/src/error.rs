//! Error taxonomy for verification and repair.

use crate::verification::GateType;

/// Verification pipeline errors.
///
/// Only `Configuration`, `DuplicateGate` and `TaskFailed` ever abort a
/// pipeline call. Runner, repair and timeout errors are caught at the gate or
/// loop boundary and reported as warnings or failed repairs.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("gate already registered for type {0}")]
    DuplicateGate(GateType),

    #[error("no runner in gate '{gate}' accepts the artifact set")]
    RunnerUnavailable { gate: String },

    #[error("runner '{runner}' failed: {reason}")]
    RunnerExecution { runner: String, reason: String },

    #[error("repair of issue {issue_id} failed: {reason}")]
    Repair { issue_id: String, reason: String },

    #[error("pipeline timed out after {elapsed_ms}ms")]
    PipelineTimeout { elapsed_ms: u64 },

    #[error("execution cancelled")]
    Cancelled,

    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("malformed repair response: {0}")]
    Protocol(String),

    #[error("invalid contract: {0}")]
    Contract(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for veriforge operations.
pub type Result<T> = std::result::Result<T, VerifyError>;
