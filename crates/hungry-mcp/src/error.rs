//! Error types for the worker client.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::codec::RpcError;

/// Errors that can occur while talking to a worker.
#[derive(Debug, Error)]
pub enum McpError {
    /// The worker process could not be started.
    #[error("Failed to spawn worker '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// A stdio pipe of the spawned worker was not captured.
    #[error("Worker {0} pipe was not captured")]
    MissingPipe(&'static str),

    /// Writing a message to the worker's stdin failed.
    #[error("Failed to write to worker: {0}")]
    Write(#[source] io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// No matching response arrived within the deadline.
    #[error("Request '{method}' timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    /// The worker's output stream closed while the request was pending.
    #[error("Connection to worker lost")]
    ConnectionLost,

    /// The worker answered with a JSON-RPC error object.
    #[error("Worker error {code}: {message}")]
    Remote { code: i64, message: String },

    /// A tool call completed but reported failure.
    #[error("Tool reported failure: {0}")]
    ToolFailed(String),

    /// Stopping the worker process failed.
    #[error("Failed to stop worker: {0}")]
    Shutdown(#[source] io::Error),
}

impl McpError {
    /// Returns true if a fresh attempt (after a restart) may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. } | Self::Write(_) | Self::Timeout { .. } | Self::ConnectionLost
        )
    }
}

impl From<RpcError> for McpError {
    fn from(error: RpcError) -> Self {
        Self::Remote {
            code: error.code,
            message: error.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(McpError::ConnectionLost.is_transient());
        assert!(McpError::Timeout {
            method: "tools/call".to_string(),
            after: Duration::from_secs(5),
        }
        .is_transient());
        assert!(!McpError::ToolFailed("no rows".to_string()).is_transient());
        assert!(!McpError::from(RpcError::new(-32601, "Method not found")).is_transient());
    }

    #[test]
    fn test_remote_error_display() {
        let err = McpError::from(RpcError::new(-32602, "Invalid params"));
        assert_eq!(err.to_string(), "Worker error -32602: Invalid params");
    }
}
