//! Live-session client facade.
//!
//! The client binds a live-session id with [`LiveSessionClient::connect`] and
//! exposes the typed operations of the live-session service. The transport is
//! opened lazily by the first operation, so connection failures surface from
//! that operation rather than from `connect`.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Local;
use tracing::debug;
use uuid::Uuid;

use crate::live::connection::{
    ConnectionHandle, ConnectionManager, ConnectionSettings, UserIdProvider,
};
use crate::live::dispatch::{CallDispatcher, Subscription};
use crate::live::error::LiveSessionError;
use crate::live::model::{Comment, CommentsCount, Like, LikeType, LikesCount, ViewsCount};
use crate::live::routing::Operation;
use crate::live::transport::{Connector, KeepAlive};
use crate::services::LIVES_SERVICE_URL;
use crate::token::TokenStore;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LiveSessionDefaults;

impl LiveSessionDefaults {
    pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);
    pub const MAX_LIFETIME: Duration = Duration::from_secs(120);
    pub const MAX_FRAGMENT_SIZE: usize = 1024;
    /// strftime pattern for comment timestamps.
    pub const DATE_FORMAT: &'static str = "%Y-%m-%dT%H:%M:%S%.3f%:z";
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveSessionOptions {
    pub keep_alive: KeepAlive,
    pub max_fragment_size: usize,
    pub date_format: String,
}

impl Default for LiveSessionOptions {
    fn default() -> Self {
        Self {
            keep_alive: KeepAlive {
                interval: LiveSessionDefaults::KEEP_ALIVE_INTERVAL,
                max_lifetime: LiveSessionDefaults::MAX_LIFETIME,
            },
            max_fragment_size: LiveSessionDefaults::MAX_FRAGMENT_SIZE,
            date_format: LiveSessionDefaults::DATE_FORMAT.to_string(),
        }
    }
}

/// Builder for [`LiveSessionClient`].
pub struct LiveSessionClientBuilder {
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenStore>,
    user_id: UserIdProvider,
    endpoint_override: Option<String>,
    options: LiveSessionOptions,
}

impl LiveSessionClientBuilder {
    /// Sets an explicit endpoint instead of the `lives` service URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.endpoint_override = Some(endpoint.trim_end().to_string());
        self
    }

    pub fn with_options(mut self, options: LiveSessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> LiveSessionClient {
        let settings = ConnectionSettings {
            endpoint: self.endpoint(),
            keep_alive: self.options.keep_alive,
            max_fragment_size: self.options.max_fragment_size,
        };
        let connections = Arc::new(ConnectionManager::new(
            self.connector,
            self.tokens,
            Arc::clone(&self.user_id),
            settings,
        ));
        LiveSessionClient {
            dispatcher: CallDispatcher::new(connections),
            user_id: self.user_id,
            date_format: self.options.date_format,
        }
    }

    fn endpoint(&self) -> String {
        self.endpoint_override
            .clone()
            .unwrap_or_else(|| LIVES_SERVICE_URL.to_string())
    }
}

/// Session-scoped client for comments, likes and counters of one live session.
///
/// All operations share one lazily opened connection. The client is cheap to
/// share behind an `Arc`; operations may run concurrently.
pub struct LiveSessionClient {
    dispatcher: CallDispatcher,
    user_id: UserIdProvider,
    date_format: String,
}

impl LiveSessionClient {
    /// Creates a client with default options and the production endpoint.
    pub fn new<F>(connector: Arc<dyn Connector>, tokens: Arc<dyn TokenStore>, user_id: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self::builder(connector, tokens, user_id).build()
    }

    pub fn builder<F>(
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenStore>,
        user_id: F,
    ) -> LiveSessionClientBuilder
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        LiveSessionClientBuilder {
            connector,
            tokens,
            user_id: Arc::new(user_id),
            endpoint_override: None,
            options: LiveSessionOptions::default(),
        }
    }

    /// Binds the live session that subsequent operations target.
    ///
    /// No network traffic happens here. Binding a different session while a
    /// connection is open closes that connection, since its handshake carried
    /// the previous session id; the next operation opens a fresh one.
    pub async fn connect(&self, live_session_id: impl Into<String>) {
        let live_session_id = live_session_id.into();
        self.dispatcher.connections().bind(&live_session_id).await;
        debug!(event = "session_bound", session_id = %live_session_id);
    }

    /// Currently bound session id.
    pub fn session_id(&self) -> Option<String> {
        self.dispatcher.connections().bound_session().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.dispatcher.connections().is_closed()
    }

    /// Handle of the open connection, if one was established.
    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.dispatcher.connections().current()
    }

    pub async fn comments_count(&self) -> Result<Subscription<CommentsCount>, LiveSessionError> {
        self.subscribe(Operation::CommentsCounter).await
    }

    pub async fn comments(&self) -> Result<Subscription<Comment>, LiveSessionError> {
        self.subscribe(Operation::Comments).await
    }

    pub async fn views(&self) -> Result<Subscription<ViewsCount>, LiveSessionError> {
        self.subscribe(Operation::Views).await
    }

    pub async fn likes(&self) -> Result<Subscription<LikesCount>, LiveSessionError> {
        self.subscribe(Operation::LikesCounter).await
    }

    /// Posts a comment and returns the comment as stored by the service.
    pub async fn send_comment(
        &self,
        content: impl Into<String>,
        full_name: impl Into<String>,
        image: impl Into<String>,
    ) -> Result<Comment, LiveSessionError> {
        let session_id = self.bound_session()?;
        let comment = Comment {
            id: Uuid::new_v4().to_string(),
            live_session_id: session_id.clone(),
            user_id: (self.user_id)(),
            content: content.into(),
            date: self.timestamp(),
            full_name: full_name.into(),
            image: image.into(),
        };
        self.dispatcher
            .request_response(&session_id, Operation::SendComment, &comment)
            .await
    }

    /// Asks which like is currently assigned to the user.
    ///
    /// `Ok(None)` means no like is assigned. The request body is the raw user
    /// id, not a JSON document.
    pub async fn ask_for_like(&self) -> Result<Option<Like>, LiveSessionError> {
        let session_id = self.bound_session()?;
        let body = Bytes::from((self.user_id)());
        self.dispatcher
            .request_optional(&session_id, Operation::LikeForUser, body)
            .await
    }

    pub async fn send_like(&self, like_type: LikeType) -> Result<Like, LiveSessionError> {
        let session_id = self.bound_session()?;
        let like = Like {
            id: Uuid::new_v4().to_string(),
            live_session_id: session_id.clone(),
            user_id: (self.user_id)(),
            like_type,
        };
        self.dispatcher
            .request_response(&session_id, Operation::SendLike, &like)
            .await
    }

    /// Closes the connection and ends every outstanding subscription.
    ///
    /// Idempotent. Operations fail with [`LiveSessionError::Closed`] until the
    /// next [`connect`](Self::connect).
    pub async fn close(&self) {
        self.dispatcher.connections().close().await;
        debug!(event = "session_closed");
    }

    async fn subscribe<T>(&self, operation: Operation) -> Result<Subscription<T>, LiveSessionError>
    where
        T: serde::de::DeserializeOwned,
    {
        let session_id = self.bound_session()?;
        self.dispatcher.request_stream(&session_id, operation).await
    }

    fn bound_session(&self) -> Result<String, LiveSessionError> {
        self.dispatcher.connections().bound_session()
    }

    fn timestamp(&self) -> String {
        let now = Local::now();
        let mut date = String::new();
        if write!(date, "{}", now.format(&self.date_format)).is_err() {
            return now.to_rfc3339();
        }
        date
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{LiveSessionClient, LiveSessionDefaults, LiveSessionOptions};
    use crate::live::error::LiveSessionError;
    use crate::live::transport::{Connector, Handshake, RpcChannel, TransportError};
    use crate::services::LIVES_SERVICE_URL;
    use crate::token::MemoryTokenStore;

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(
            &self,
            _handshake: Handshake,
        ) -> Result<Arc<dyn RpcChannel>, TransportError> {
            Err(TransportError::Connect("refused".to_string()))
        }
    }

    fn client() -> LiveSessionClient {
        LiveSessionClient::new(
            Arc::new(RefusingConnector),
            Arc::new(MemoryTokenStore::new()),
            || "u1".to_string(),
        )
    }

    #[test]
    fn options_default_to_thirty_second_keep_alive() {
        let options = LiveSessionOptions::default();
        assert_eq!(options.keep_alive.interval, Duration::from_secs(30));
        assert_eq!(options.keep_alive.max_lifetime, Duration::from_secs(120));
        assert_eq!(options.max_fragment_size, LiveSessionDefaults::MAX_FRAGMENT_SIZE);
    }

    #[test]
    fn endpoint_defaults_to_lives_service() {
        let builder = LiveSessionClient::builder(
            Arc::new(RefusingConnector),
            Arc::new(MemoryTokenStore::new()),
            || "u1".to_string(),
        );
        assert_eq!(builder.endpoint(), LIVES_SERVICE_URL);
    }

    #[test]
    fn endpoint_override_is_trimmed() {
        let builder = LiveSessionClient::builder(
            Arc::new(RefusingConnector),
            Arc::new(MemoryTokenStore::new()),
            || "u1".to_string(),
        )
        .with_endpoint("wss://lives.example/rsocket  \n");
        assert_eq!(builder.endpoint(), "wss://lives.example/rsocket");
    }

    #[test]
    fn invalid_date_format_falls_back_to_rfc3339() {
        let client = LiveSessionClient::builder(
            Arc::new(RefusingConnector),
            Arc::new(MemoryTokenStore::new()),
            || "u1".to_string(),
        )
        .with_options(LiveSessionOptions {
            date_format: "%Q".to_string(),
            ..LiveSessionOptions::default()
        })
        .build();
        assert!(chrono::DateTime::parse_from_rfc3339(&client.timestamp()).is_ok());
    }

    #[tokio::test]
    async fn operations_before_connect_are_setup_errors() {
        let client = client();
        let err = client.send_like(crate::live::model::LikeType::Like).await;
        assert!(matches!(err, Err(LiveSessionError::NotConnected)));
        assert!(client.session_id().is_none());
    }

    #[tokio::test]
    async fn missing_credential_fails_before_connecting() {
        let client = client();
        client.connect("S1").await;
        let err = client.ask_for_like().await.expect_err("no token stored");
        assert!(matches!(err, LiveSessionError::MissingCredential));
        assert!(client.connection().is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_operations() {
        let client = client();
        client.connect("S1").await;
        client.close().await;
        client.close().await;
        assert!(client.is_closed());
        assert!(matches!(client.views().await, Err(LiveSessionError::Closed)));
    }
}
