use thiserror::Error;

use crate::live::routing::{Operation, RoutingError};
use crate::live::transport::TransportError;
use crate::token::TokenStoreError;

/// Errors produced by the live-session client.
#[derive(Debug, Error)]
pub enum LiveSessionError {
    /// No credential in the token store; the handshake cannot be built.
    #[error("no session credential is stored")]
    MissingCredential,

    /// The token store could not be read.
    #[error("token store error: {0}")]
    TokenStore(#[from] TokenStoreError),

    /// A call was issued before `connect` bound a live session.
    #[error("no live session is bound, call connect first")]
    NotConnected,

    /// The client was closed and has not been reconnected.
    #[error("live session client is closed")]
    Closed,

    /// The call targeted a session the client is no longer bound to.
    #[error("live session {session_id} is no longer bound")]
    SessionChanged { session_id: String },

    /// Connecting or sending failed at the transport.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Call metadata could not be encoded.
    #[error("routing metadata error: {0}")]
    Routing(#[from] RoutingError),

    /// Handshake body could not be serialized.
    #[error("handshake body encode failed: {0}")]
    HandshakeEncode(#[source] serde_json::Error),

    /// Request body could not be serialized.
    #[error("{operation} request encode failed: {source}")]
    Encode {
        operation: Operation,
        #[source]
        source: serde_json::Error,
    },

    /// Reply body did not match the expected shape.
    #[error("{operation} reply decode failed: {source}")]
    Decode {
        operation: Operation,
        #[source]
        source: serde_json::Error,
    },

    /// An active subscription received an error frame.
    #[error("{operation} stream failed: {source}")]
    Stream {
        operation: Operation,
        #[source]
        source: TransportError,
    },
}

impl LiveSessionError {
    /// Usage or configuration errors that retrying cannot fix.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            LiveSessionError::MissingCredential
                | LiveSessionError::TokenStore(_)
                | LiveSessionError::NotConnected
                | LiveSessionError::Closed
        )
    }

    /// Whether a caller-level retry could reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LiveSessionError::Transport(err) | LiveSessionError::Stream { source: err, .. } => {
                matches!(
                    err,
                    TransportError::Connect(_) | TransportError::Io(_) | TransportError::Closed
                )
            }
            _ => false,
        }
    }
}
