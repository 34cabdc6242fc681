//! Shared handle to an established connection.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::authorization::AuthorizationService;
use crate::domain::{
    Address, Capability, CloseReason, ConnectionError, ConnectionMetrics,
    ConnectionMetricsSnapshot, NetworkEnvelope, NetworkLoad, NetworkMessage,
};

/// First counter used for application messages. Handshake messages use `0`.
pub const FIRST_MESSAGE_COUNTER: u32 = 1;

/// Unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side opened the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionDirection {
    Inbound,
    Outbound,
}

/// Work for the connection task.
#[derive(Debug)]
pub(crate) enum Command {
    Send(NetworkEnvelope),
    Shutdown(CloseReason),
}

/// Everything the handshake established about a connection.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionSetup {
    pub id: ConnectionId,
    pub direction: ConnectionDirection,
    pub peer_capability: Capability,
    pub peer_network_load: NetworkLoad,
    pub my_address: Address,
    pub my_network_load: NetworkLoad,
    pub authorization_service: Arc<AuthorizationService>,
}

struct ConnectionInner {
    id: ConnectionId,
    setup: ConnectionSetup,
    metrics: ConnectionMetrics,
    next_counter: AtomicU32,
    // Counter allocation and enqueueing happen under one lock so the wire
    // order matches the counter order.
    send_lock: Mutex<()>,
    commands: mpsc::UnboundedSender<Command>,
    closed: AtomicBool,
}

/// Cloneable handle to an established connection.
///
/// The socket itself is owned by the connection task; the handle only
/// queues work for it. Cloning is cheap and all clones refer to the same
/// connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(setup: ConnectionSetup) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id: setup.id,
                setup,
                metrics: ConnectionMetrics::new(),
                next_counter: AtomicU32::new(FIRST_MESSAGE_COUNTER),
                send_lock: Mutex::new(()),
                commands,
                closed: AtomicBool::new(false),
            }),
        };
        (connection, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn direction(&self) -> ConnectionDirection {
        self.inner.setup.direction
    }

    pub fn peer_capability(&self) -> &Capability {
        &self.inner.setup.peer_capability
    }

    pub fn peer_address(&self) -> &Address {
        self.inner.setup.peer_capability.address()
    }

    /// Load the peer declared during the handshake. Our tokens are minted
    /// against it.
    pub fn peer_network_load(&self) -> NetworkLoad {
        self.inner.setup.peer_network_load
    }

    /// Address the peer's tokens must be bound to.
    pub fn my_address(&self) -> &Address {
        &self.inner.setup.my_address
    }

    /// Load we declared during the handshake.
    pub fn my_network_load(&self) -> NetworkLoad {
        self.inner.setup.my_network_load
    }

    pub fn metrics(&self) -> ConnectionMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.inner.metrics.on_sent(bytes);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.inner.metrics.on_received(bytes);
    }

    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) -> bool {
        !self.inner.closed.swap(true, Ordering::AcqRel)
    }

    /// Authorize `message` for the peer and queue it.
    ///
    /// Minting runs on the blocking pool. Returns once the envelope is
    /// queued, not when it hits the wire.
    pub async fn send(&self, message: NetworkMessage) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::ConnectionClosed);
        }
        let _guard = self.inner.send_lock.lock().await;
        let counter = self.inner.next_counter.fetch_add(1, Ordering::AcqRel);
        let envelope = self.authorize(message, counter).await?;
        self.inner
            .commands
            .send(Command::Send(envelope))
            .map_err(|_| ConnectionError::ConnectionClosed)
    }

    /// Tell the peer why we are leaving, then stop the connection task.
    /// Best effort and idempotent.
    pub async fn close(&self, reason: CloseReason) {
        if !self.is_open() {
            return;
        }
        let notice = NetworkMessage::CloseConnection {
            reason: reason.clone(),
        };
        if let Err(e) = self.send(notice).await {
            debug!(connection = %self.id(), error = %e, "Close notice not sent");
        }
        let _ = self.inner.commands.send(Command::Shutdown(reason));
    }

    /// Stop the connection task without notifying the peer.
    pub(crate) fn abort(&self, reason: CloseReason) {
        let _ = self.inner.commands.send(Command::Shutdown(reason));
    }

    async fn authorize(
        &self,
        message: NetworkMessage,
        counter: u32,
    ) -> Result<NetworkEnvelope, ConnectionError> {
        let authorization_service = Arc::clone(&self.inner.setup.authorization_service);
        let load = self.inner.setup.peer_network_load;
        let receiver = self.peer_address().clone();
        tokio::task::spawn_blocking(move || {
            let token = authorization_service.create_token(&message, &load, &receiver, counter)?;
            Ok(NetworkEnvelope::new(token, message))
        })
        .await
        .map_err(|_| ConnectionError::Cancelled)?
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("direction", &self.inner.setup.direction)
            .field("peer", &self.inner.setup.peer_capability)
            .field("open", &self.is_open())
            .finish()
    }
}
