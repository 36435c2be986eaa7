use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// One failed item of a sync batch, keyed by the envelope's natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    pub natural_key: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{op}: {source}")]
    Internal {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The bus rejected a message. `committed` is true when the database writes
    /// were already durable at the time of the failure.
    #[error("push failed: {reason}")]
    PublishFailed { committed: bool, reason: String },

    #[error("feature gate unavailable: {0}")]
    Gate(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{} item(s) failed", .0.len())]
    PartialBatch(Vec<ItemFailure>),
}

impl OrchestratorError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Stable code used in IPC error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "bad_params",
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Internal { .. } => "operation_failed",
            Self::PublishFailed { .. } => "push_failed",
            Self::Gate(_) => "flag_unavailable",
            Self::Cancelled => "cancelled",
            Self::PartialBatch(_) => "partial_batch",
        }
    }
}

/// Wraps store failures with the name of the operation that hit them.
pub trait OpContext<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> OpContext<T> for std::result::Result<T, rusqlite::Error> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|e| OrchestratorError::Internal {
            op,
            source: e.into(),
        })
    }
}

impl<T> OpContext<T> for anyhow::Result<T> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|source| OrchestratorError::Internal { op, source })
    }
}

impl<T> OpContext<T> for std::result::Result<T, serde_json::Error> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|e| OrchestratorError::Internal {
            op,
            source: e.into(),
        })
    }
}
