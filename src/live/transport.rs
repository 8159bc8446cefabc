//! Seam to the multiplexed transport.
//!
//! Framing, socket handling and interleaving of concurrent calls belong to the
//! transport implementation. The session client only needs to open a channel
//! with a handshake and then issue request/response and request/stream calls
//! on it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::live::routing::MimeType;

/// One frame body plus its metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    pub metadata: Bytes,
    pub data: Bytes,
}

impl Payload {
    pub fn new(metadata: Bytes, data: Bytes) -> Self {
        Self { metadata, data }
    }
}

/// Liveness settings negotiated during the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeepAlive {
    /// Interval between keep-alive frames.
    pub interval: Duration,
    /// Silence after which the connection is considered dead.
    pub max_lifetime: Duration,
}

/// Everything the transport needs to open and set up a channel.
#[derive(Clone)]
pub struct Handshake {
    pub endpoint: String,
    pub data_mime_type: MimeType,
    pub metadata_mime_type: MimeType,
    pub keep_alive: KeepAlive,
    pub max_fragment_size: usize,
    /// Setup frame payload: composite auth metadata and the JSON connection body.
    pub payload: Payload,
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("endpoint", &self.endpoint)
            .field("data_mime_type", &self.data_mime_type)
            .field("metadata_mime_type", &self.metadata_mime_type)
            .field("keep_alive", &self.keep_alive)
            .field("max_fragment_size", &self.max_fragment_size)
            .field("metadata", &format_args!("<{} bytes redacted>", self.payload.metadata.len()))
            .field("data_len", &self.payload.data.len())
            .finish()
    }
}

/// Errors reported by a transport implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Opening the channel or the handshake failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The underlying byte channel failed mid-call.
    #[error("transport io error: {0}")]
    Io(String),

    /// The remote end answered with an error frame.
    #[error("remote error {code}: {message}")]
    Remote { code: u32, message: String },

    /// The channel is closed.
    #[error("channel is closed")]
    Closed,
}

/// Unbounded sequence of reply payloads for one subscription.
///
/// Dropping the stream cancels the subscription on the transport.
pub type PayloadStream = BoxStream<'static, Result<Payload, TransportError>>;

/// An open multiplexed channel shared by every call of a session client.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Sends one request and awaits exactly one reply.
    async fn request_response(&self, payload: Payload) -> Result<Payload, TransportError>;

    /// Opens a subscription whose replies arrive in emission order.
    async fn request_stream(&self, payload: Payload) -> Result<PayloadStream, TransportError>;

    /// Closes the channel; outstanding calls fail or end.
    async fn close(&self);
}

/// Opens channels. Each call opens one new physical connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, handshake: Handshake) -> Result<Arc<dyn RpcChannel>, TransportError>;
}
