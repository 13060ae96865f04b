//! Typed client for the node's JSON-RPC surface.
//!
//! Transport-agnostic: HTTP (or anything else) plugs in behind
//! [`RpcTransport`], so the node's own wire stack stays an external
//! collaborator.

pub mod client;
pub mod models;

pub use client::{RpcClient, RpcTransport};
pub use models::{
    BlockDto, InvokeResultDto, RpcRequest, RpcResponse, StackItemDto, StateRootDto,
    TransactionDto,
};

use thiserror::Error;

/// Client-side failures and mapped server error codes.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The transport could not complete the exchange.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The response was not valid JSON-RPC.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered with an error object.
    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },

    /// A payload field failed to decode.
    #[error("decode error: {0}")]
    Decode(String),
}

impl RpcError {
    /// Whether retrying the call can conceivably succeed.
    ///
    /// Resource and accounting rejections may clear up; validation errors
    /// and protocol violations never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Transport(_) => true,
            RpcError::Server { code, .. } => matches!(code, -505 | -511),
            _ => false,
        }
    }
}

/// Result type for client calls.
pub type RpcResult<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_error_class() {
        assert!(RpcError::Transport("reset".into()).is_retryable());
        // Mempool OOM and conflict map to retryable server codes.
        assert!(RpcError::Server {
            code: -505,
            message: "out of memory".into()
        }
        .is_retryable());
        assert!(!RpcError::Server {
            code: -500,
            message: "invalid signature".into()
        }
        .is_retryable());
        assert!(!RpcError::Decode("bad hex".into()).is_retryable());
    }
}
