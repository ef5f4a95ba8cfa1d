//! RPC error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("{endpoint}: request timed out: {reason}")]
    Timeout { endpoint: String, reason: String },

    #[error("{endpoint}: unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("{endpoint}: request failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("{endpoint}: RPC error {code}: {message}")]
    Remote {
        endpoint: String,
        code: i64,
        message: String,
    },

    #[error("{endpoint}: invalid response: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl RpcError {
    /// Whether the failure happened before the request reached the remote side.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RpcError::Unreachable { .. })
    }
}
