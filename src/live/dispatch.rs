//! Routed request/response and request/stream calls over the shared channel.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures_util::stream::{self, FusedStream, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::WaitForCancellationFutureOwned;
use tracing::{debug, warn};

use crate::live::connection::{ConnectionHandle, ConnectionManager};
use crate::live::error::LiveSessionError;
use crate::live::model::{from_body, from_optional_body, to_body};
use crate::live::routing::{Operation, RoutingKey};
use crate::live::transport::{Payload, PayloadStream, TransportError};

/// Issues calls tagged with a routing key on the managed connection.
///
/// Calls are not serialized against each other; the transport interleaves
/// them on the one channel.
#[derive(Debug, Clone)]
pub struct CallDispatcher {
    connections: Arc<ConnectionManager>,
}

impl CallDispatcher {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Sends `request` as JSON and decodes exactly one reply into `R`.
    pub async fn request_response<T, R>(
        &self,
        session_id: &str,
        operation: Operation,
        request: &T,
    ) -> Result<R, LiveSessionError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let data =
            to_body(request).map_err(|source| LiveSessionError::Encode { operation, source })?;
        let reply = self.call(session_id, operation, data).await?;
        from_body(&reply).map_err(|source| LiveSessionError::Decode { operation, source })
    }

    /// Like [`request_response`](Self::request_response) with a raw request
    /// body and a reply that may carry no value.
    pub async fn request_optional<R>(
        &self,
        session_id: &str,
        operation: Operation,
        data: Bytes,
    ) -> Result<Option<R>, LiveSessionError>
    where
        R: DeserializeOwned,
    {
        let reply = self.call(session_id, operation, data).await?;
        from_optional_body(&reply).map_err(|source| LiveSessionError::Decode { operation, source })
    }

    /// Opens a subscription with an empty request body.
    pub async fn request_stream<R>(
        &self,
        session_id: &str,
        operation: Operation,
    ) -> Result<Subscription<R>, LiveSessionError>
    where
        R: DeserializeOwned,
    {
        let key = RoutingKey::new(operation, session_id);
        debug!(event = "request_stream", route = %key);
        let payload = Payload::new(self.metadata(session_id, &key)?, Bytes::new());

        let handle = self.connections.ensure_connected(session_id).await?;
        let shutdown = handle.shutdown_token();
        let opened = tokio::select! {
            _ = shutdown.cancelled() => return Err(handle.shutdown_error()),
            opened = handle.channel().request_stream(payload) => opened,
        };
        match opened {
            Ok(inner) => Ok(Subscription::new(operation, inner, &handle)),
            Err(err) => Err(self.fail(&handle, err).await),
        }
    }

    async fn call(
        &self,
        session_id: &str,
        operation: Operation,
        data: Bytes,
    ) -> Result<Bytes, LiveSessionError> {
        let key = RoutingKey::new(operation, session_id);
        debug!(event = "request_response", route = %key);
        let payload = Payload::new(self.metadata(session_id, &key)?, data);

        let handle = self.connections.ensure_connected(session_id).await?;
        let shutdown = handle.shutdown_token();
        let reply = tokio::select! {
            _ = shutdown.cancelled() => return Err(handle.shutdown_error()),
            reply = handle.channel().request_response(payload) => reply,
        };
        match reply {
            Ok(reply) => Ok(reply.data),
            Err(err) => Err(self.fail(&handle, err).await),
        }
    }

    fn metadata(&self, session_id: &str, key: &RoutingKey) -> Result<Bytes, LiveSessionError> {
        if session_id.is_empty() {
            return Err(LiveSessionError::NotConnected);
        }
        Ok(key.to_metadata()?)
    }

    async fn fail(&self, handle: &ConnectionHandle, err: TransportError) -> LiveSessionError {
        if matches!(err, TransportError::Io(_) | TransportError::Closed) {
            self.connections.invalidate(handle).await;
        }
        err.into()
    }
}

/// Lazy, unbounded sequence of decoded replies for one subscription.
///
/// Dropping it releases interest in the stream only; the connection and other
/// calls are unaffected. When the owning client closes, the sequence yields a
/// final [`LiveSessionError::Closed`] and ends. If the connection breaks
/// underneath it, the final item is a retryable [`LiveSessionError::Stream`]
/// instead. An error frame or an undecodable reply is yielded once and ends
/// the sequence.
pub struct Subscription<T> {
    operation: Operation,
    handle: ConnectionHandle,
    inner: PayloadStream,
    shutdown: Pin<Box<WaitForCancellationFutureOwned>>,
    finished: bool,
    _reply: PhantomData<fn() -> T>,
}

impl<T> Subscription<T> {
    fn new(operation: Operation, inner: PayloadStream, handle: &ConnectionHandle) -> Self {
        Self {
            operation,
            handle: handle.clone(),
            inner,
            shutdown: Box::pin(handle.shutdown_token().cancelled_owned()),
            finished: false,
            _reply: PhantomData,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Id of the connection the subscription runs on.
    pub fn connection_id(&self) -> u64 {
        self.handle.id()
    }

    fn finish(&mut self) {
        self.finished = true;
        self.inner = stream::empty().boxed();
    }
}

impl<T: DeserializeOwned> Subscription<T> {
    /// Receives the next reply.
    pub async fn recv(&mut self) -> Option<Result<T, LiveSessionError>> {
        self.next().await
    }
}

impl<T: DeserializeOwned> Stream for Subscription<T> {
    type Item = Result<T, LiveSessionError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        let operation = this.operation;
        if this.shutdown.as_mut().poll(cx).is_ready() {
            let reason = this.handle.shutdown_reason();
            debug!(event = "stream_closed", operation = %operation, reason = ?reason);
            this.finish();
            let err = match this.handle.shutdown_error() {
                LiveSessionError::Transport(source) => {
                    LiveSessionError::Stream { operation, source }
                }
                err => err,
            };
            return Poll::Ready(Some(Err(err)));
        }

        let item = match ready!(this.inner.poll_next_unpin(cx)) {
            Some(Ok(payload)) => from_body(&payload.data)
                .map_err(|source| LiveSessionError::Decode { operation, source }),
            Some(Err(source)) => Err(LiveSessionError::Stream { operation, source }),
            None => {
                debug!(event = "stream_completed", operation = %operation);
                this.finish();
                return Poll::Ready(None);
            }
        };
        if let Err(err) = &item {
            warn!(event = "stream_failed", operation = %operation, error = %err);
            this.finish();
        }
        Poll::Ready(Some(item))
    }
}

impl<T: DeserializeOwned> FusedStream for Subscription<T> {
    fn is_terminated(&self) -> bool {
        self.finished
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("operation", &self.operation)
            .field("connection_id", &self.handle.id())
            .field("finished", &self.finished)
            .finish()
    }
}
