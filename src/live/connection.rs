//! Lazy, single-flight ownership of the shared transport channel.
//!
//! The first call that needs the channel opens it while holding the creation
//! lock; concurrent first callers wait on that lock and then observe the same
//! handle. Established handles are read without touching the creation lock.
//!
//! The bound session lives here too. Binding, closing and creating all happen
//! under the creation lock, so a caller that read a stale binding can never
//! install a connection after `close` or for a session that is no longer bound.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::live::error::LiveSessionError;
use crate::live::model::{to_body, ConnectionBody};
use crate::live::routing::{CompositeMetadata, MimeType};
use crate::live::transport::{
    Connector, Handshake, KeepAlive, Payload, RpcChannel, TransportError,
};
use crate::token::TokenStore;

/// Returns the current user id; called every time one is needed.
pub type UserIdProvider = Arc<dyn Fn() -> String + Send + Sync>;

/// Parameters used to open the channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub endpoint: String,
    pub keep_alive: KeepAlive,
    pub max_fragment_size: usize,
}

/// Why an established connection was torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The client was closed.
    Closed,
    /// The client was bound to a different session.
    Rebound,
    /// The transport reported the channel broken.
    Broken,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Binding {
    Unbound,
    Bound(String),
    Closed,
}

impl Binding {
    fn is_bound_to(&self, session_id: &str) -> bool {
        matches!(self, Binding::Bound(id) if id == session_id)
    }
}

/// Shared reference to one established channel.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: u64,
    session_id: String,
    channel: Arc<dyn RpcChannel>,
    shutdown: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl ConnectionHandle {
    /// Sequence number of the physical connection, unique per manager.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Session the handshake of this connection was made for.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn channel(&self) -> &Arc<dyn RpcChannel> {
        &self.channel
    }

    /// Cancelled when the connection is torn down for any reason.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Set once the connection has been torn down.
    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// Whether both handles refer to the same physical connection.
    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.channel, &other.channel)
    }

    /// Error reported to calls and subscriptions cut off by the shutdown.
    pub(crate) fn shutdown_error(&self) -> LiveSessionError {
        match self.shutdown_reason() {
            Some(ShutdownReason::Broken) => LiveSessionError::Transport(TransportError::Closed),
            Some(ShutdownReason::Rebound) => LiveSessionError::SessionChanged {
                session_id: self.session_id.clone(),
            },
            Some(ShutdownReason::Closed) | None => LiveSessionError::Closed,
        }
    }

    async fn shut_down(&self, reason: ShutdownReason) {
        // first reason wins; it must be visible before the token fires
        let _ = self.reason.set(reason);
        self.shutdown.cancel();
        self.channel.close().await;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenStore>,
    user_id: UserIdProvider,
    settings: ConnectionSettings,
    binding: RwLock<Binding>,
    current: RwLock<Option<ConnectionHandle>>,
    create_lock: Mutex<()>,
    opened: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenStore>,
        user_id: UserIdProvider,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            connector,
            tokens,
            user_id,
            settings,
            binding: RwLock::new(Binding::Unbound),
            current: RwLock::new(None),
            create_lock: Mutex::new(()),
            opened: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Returns the established handle without waiting.
    pub fn current(&self) -> Option<ConnectionHandle> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Session that calls are routed to, or the setup error explaining why
    /// there is none.
    pub fn bound_session(&self) -> Result<String, LiveSessionError> {
        match &*self.binding.read().unwrap_or_else(PoisonError::into_inner) {
            Binding::Bound(id) => Ok(id.clone()),
            Binding::Unbound => Err(LiveSessionError::NotConnected),
            Binding::Closed => Err(LiveSessionError::Closed),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            &*self.binding.read().unwrap_or_else(PoisonError::into_inner),
            Binding::Closed
        )
    }

    /// Binds `session_id`; a connection made for another session is torn down.
    pub async fn bind(&self, session_id: &str) {
        self.set_binding(Binding::Bound(session_id.to_string()));
        let _guard = self.create_lock.lock().await;
        self.retire_stale().await;
    }

    /// Returns the shared handle, opening the channel on first use.
    ///
    /// At most one caller performs the handshake; a failed attempt leaves no
    /// handle behind so a later call can try again. The binding is re-checked
    /// under the creation lock, so nothing is opened once the client was closed
    /// or rebound after the caller read its session.
    pub async fn ensure_connected(
        &self,
        session_id: &str,
    ) -> Result<ConnectionHandle, LiveSessionError> {
        if let Some(handle) = self.current_for(session_id) {
            return Ok(handle);
        }

        let _guard = self.create_lock.lock().await;
        let bound = self.bound_session()?;
        if bound != session_id {
            debug!(event = "connection_skipped", session_id, bound = %bound);
            return Err(LiveSessionError::SessionChanged {
                session_id: session_id.to_string(),
            });
        }
        if let Some(handle) = self.current_for(session_id) {
            return Ok(handle);
        }

        let handshake = self.handshake(session_id)?;
        debug!(
            event = "connection_opening",
            endpoint = %self.settings.endpoint,
            session_id
        );
        let channel = match self.connector.connect(handshake).await {
            Ok(channel) => channel,
            Err(err) => {
                warn!(event = "connection_failed", session_id, error = %err);
                return Err(err.into());
            }
        };

        let handle = ConnectionHandle {
            id: self.opened.fetch_add(1, Ordering::SeqCst) + 1,
            session_id: session_id.to_string(),
            channel,
            shutdown: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
        };
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(handle.clone());
        debug!(event = "connection_established", connection_id = handle.id, session_id);
        Ok(handle)
    }

    /// Marks the manager closed and tears down the established channel, if
    /// any. Idempotent.
    ///
    /// Subscriptions opened on the channel observe the shutdown token and end.
    /// Calls fail with [`LiveSessionError::Closed`] until the next
    /// [`bind`](Self::bind).
    pub async fn close(&self) {
        self.set_binding(Binding::Closed);
        let _guard = self.create_lock.lock().await;
        self.retire_stale().await;
    }

    /// Forgets `handle` after the transport reported it broken.
    ///
    /// A newer handle installed in the meantime is left alone.
    pub(crate) async fn invalidate(&self, handle: &ConnectionHandle) {
        let removed = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            match current.as_ref() {
                Some(installed) if installed.id == handle.id => current.take(),
                _ => None,
            }
        };
        if let Some(handle) = removed {
            warn!(event = "connection_invalidated", connection_id = handle.id);
            handle.shut_down(ShutdownReason::Broken).await;
        }
    }

    fn current_for(&self, session_id: &str) -> Option<ConnectionHandle> {
        self.current().filter(|handle| handle.session_id == session_id)
    }

    fn set_binding(&self, binding: Binding) {
        *self.binding.write().unwrap_or_else(PoisonError::into_inner) = binding;
    }

    /// Tears down the installed handle unless it serves the current binding.
    /// Callers hold the creation lock.
    async fn retire_stale(&self) {
        let binding = self
            .binding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let stale = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            match current.as_ref() {
                Some(installed) if !binding.is_bound_to(&installed.session_id) => current.take(),
                _ => None,
            }
        };
        if let Some(handle) = stale {
            let reason = match binding {
                Binding::Closed => ShutdownReason::Closed,
                Binding::Unbound | Binding::Bound(_) => ShutdownReason::Rebound,
            };
            handle.shut_down(reason).await;
            debug!(event = "connection_closed", connection_id = handle.id, reason = ?reason);
        }
    }

    fn handshake(&self, session_id: &str) -> Result<Handshake, LiveSessionError> {
        let token = self
            .tokens
            .token()?
            .ok_or(LiveSessionError::MissingCredential)?;
        let mut metadata = CompositeMetadata::new();
        metadata.push_bearer(&token)?;

        let body = ConnectionBody {
            user_id: (self.user_id)(),
            live_session_id: session_id.to_string(),
        };
        let data = to_body(&body).map_err(LiveSessionError::HandshakeEncode)?;

        Ok(Handshake {
            endpoint: self.settings.endpoint.clone(),
            data_mime_type: MimeType::ApplicationJson,
            metadata_mime_type: MimeType::CompositeMetadata,
            keep_alive: self.settings.keep_alive,
            max_fragment_size: self.settings.max_fragment_size,
            payload: Payload::new(metadata.freeze(), data),
        })
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("settings", &self.settings)
            .field(
                "binding",
                &*self.binding.read().unwrap_or_else(PoisonError::into_inner),
            )
            .field("current", &self.current())
            .finish()
    }
}
