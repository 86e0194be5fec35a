//! Transport-level error types.

use thiserror::Error;

use vaultindex_core::error::IndexerError;

use super::request::JsonRpcError;

/// Errors that can occur during an RPC transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, non-2xx status, bad body).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Every endpoint of a fallback transport failed.
    #[error("All providers unavailable")]
    AllProvidersDown,

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this error is transient and another endpoint may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout { .. })
    }
}

impl From<TransportError> for IndexerError {
    fn from(e: TransportError) -> Self {
        IndexerError::Rpc(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(TransportError::Http("connection refused".into()).is_retryable());
        assert!(TransportError::Timeout { ms: 30_000 }.is_retryable());
        let rpc = TransportError::Rpc(JsonRpcError {
            code: -32000,
            message: "execution reverted".into(),
        });
        assert!(!rpc.is_retryable());
        assert_eq!(rpc.to_string(), "RPC error -32000: execution reverted");
        assert!(!TransportError::AllProvidersDown.is_retryable());
    }

    #[test]
    fn converts_into_indexer_rpc_error() {
        let err: IndexerError = TransportError::Timeout { ms: 5 }.into();
        assert!(matches!(err, IndexerError::Rpc(msg) if msg.contains("5ms")));
    }
}
