//! Accepts sockets and runs the responder side of the handshake.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters::TcpChannel;
use crate::codec::NetworkEnvelopeChannel;
use crate::connection::task;
use crate::connection::{
    Connection, ConnectionContext, ConnectionDirection, ConnectionId, ConnectionSetup,
};
use crate::domain::{Address, ConnectionError, NetworkEnvelope};
use crate::handshake::ConnectionHandshakeResponder;
use crate::ports::ByteChannel;

/// Delay before retrying a failed `accept`, doubled per consecutive
/// failure. Running out of descriptors fails every accept until some close.
#[derive(Debug)]
pub(crate) struct AcceptBackoff {
    current: Duration,
}

impl AcceptBackoff {
    pub(crate) const MIN: Duration = Duration::from_millis(10);
    pub(crate) const MAX: Duration = Duration::from_secs(1);

    pub(crate) fn new() -> Self {
        Self { current: Self::MIN }
    }

    pub(crate) fn reset(&mut self) {
        self.current = Self::MIN;
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (delay * 2).min(Self::MAX);
        delay
    }
}

/// Keeps an accepted socket listed as in handshake until its task ends,
/// including when the task is aborted before it first runs.
struct HandshakeTicket {
    manager: Arc<InboundConnectionsManager>,
    id: ConnectionId,
}

impl Drop for HandshakeTicket {
    fn drop(&mut self) {
        self.manager.in_handshake.lock().remove(&self.id);
        self.manager.handshakes.lock().remove(&self.id);
    }
}

/// Listening side of the node.
///
/// Every accepted socket gets an id and is tracked as "in handshake" until
/// the responder either promotes it to an established [`Connection`] or
/// closes it. Sockets are handled concurrently; a slow or malicious client
/// only holds up its own task.
pub struct InboundConnectionsManager {
    listener: TcpListener,
    local_addr: SocketAddr,
    context: ConnectionContext,
    in_handshake: Mutex<HashSet<ConnectionId>>,
    established: Mutex<HashMap<ConnectionId, Connection>>,
    handshakes: Mutex<HashMap<ConnectionId, JoinHandle<()>>>,
    closed: AtomicBool,
}

impl InboundConnectionsManager {
    /// Bind `address`. Port `0` picks a free port; see
    /// [`local_addr`](Self::local_addr).
    pub async fn bind(address: &Address, context: ConnectionContext) -> Result<Self, ConnectionError> {
        let listener = TcpListener::bind((address.host(), address.port())).await?;
        Self::from_listener(listener, context)
    }

    pub fn from_listener(
        listener: TcpListener,
        context: ConnectionContext,
    ) -> Result<Self, ConnectionError> {
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Listening for inbound connections");
        Ok(Self {
            listener,
            local_addr,
            context,
            in_handshake: Mutex::new(HashSet::new()),
            established: Mutex::new(HashMap::new()),
            handshakes: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the accept loop. Each accepted socket is handled on its own
    /// task. Abort the returned handle to stop accepting, then
    /// [`close`](Self::close) to stop the handshakes already running.
    pub fn register_op_accept(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff = AcceptBackoff::new();
            loop {
                match manager.accept_new_connection().await {
                    Ok((id, channel)) => {
                        backoff.reset();
                        manager.spawn_handshake(id, channel);
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        warn!(error = %e, retry_ms = delay.as_millis() as u64, "Accept failed");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }

    fn spawn_handshake(self: &Arc<Self>, id: ConnectionId, channel: TcpChannel) {
        let mut handshakes = self.handshakes.lock();
        if self.is_closed() {
            self.in_handshake.lock().remove(&id);
            debug!(connection = %id, "Dropping socket accepted while closing");
            return;
        }
        let ticket = HandshakeTicket {
            manager: Arc::clone(self),
            id,
        };
        let manager = Arc::clone(self);
        let join = tokio::spawn(async move {
            let _ticket = ticket;
            // Failures are logged by the handler itself
            let _ = manager
                .handle_inbound_connection(id, channel, Vec::new())
                .await;
        });
        handshakes.insert(id, join);
    }

    /// Refuse further promotions and abort every handshake still running.
    ///
    /// Returns once the aborted tasks are gone, so no connection can be
    /// established through this manager afterwards.
    pub async fn close(&self) {
        let handshakes: Vec<_> = {
            let mut handshakes = self.handshakes.lock();
            self.closed.store(true, Ordering::SeqCst);
            handshakes.drain().map(|(_, join)| join).collect()
        };
        if !handshakes.is_empty() {
            debug!(count = handshakes.len(), "Aborting inbound handshakes");
        }
        for join in &handshakes {
            join.abort();
        }
        for join in handshakes {
            let _ = join.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Accept one socket and start tracking it.
    pub async fn accept_new_connection(&self) -> Result<(ConnectionId, TcpChannel), ConnectionError> {
        let (stream, remote) = self.listener.accept().await?;
        let id = ConnectionId::new();
        self.in_handshake.lock().insert(id);
        debug!(connection = %id, remote = %remote, "Accepted socket");
        Ok((id, TcpChannel::new(stream)))
    }

    /// `true` while `id` is handshaking or established through this manager.
    pub fn is_inbound_connection(&self, id: ConnectionId) -> bool {
        self.in_handshake.lock().contains(&id) || self.established.lock().contains_key(&id)
    }

    pub fn in_handshake_count(&self) -> usize {
        self.in_handshake.lock().len()
    }

    /// Run the responder over the initial envelopes and on success write
    /// the response and promote the socket.
    ///
    /// `already_read` holds envelopes the caller pulled off the socket
    /// itself; when empty, the first read supplies them. Any failure closes
    /// the socket without sending anything back.
    pub async fn handle_inbound_connection<C: ByteChannel + 'static>(
        &self,
        id: ConnectionId,
        channel: C,
        already_read: Vec<NetworkEnvelope>,
    ) -> Result<Connection, ConnectionError> {
        self.in_handshake.lock().insert(id);
        let mut channel = NetworkEnvelopeChannel::with_config(channel, self.context.envelope_config);

        let result = tokio::time::timeout(
            self.context.handshake_timeout,
            self.respond(id, &mut channel, already_read),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ConnectionError::HandshakeTimeout {
                peer: id.to_string(),
            })
        });

        let outcome = match result {
            Ok(setup) => self.promote(setup, channel),
            Err(e) => {
                warn!(connection = %id, error = %e, "Inbound handshake failed");
                channel.close();
                Err(e)
            }
        };
        self.in_handshake.lock().remove(&id);
        outcome
    }

    async fn respond<C: ByteChannel + 'static>(
        &self,
        id: ConnectionId,
        channel: &mut NetworkEnvelopeChannel<C>,
        already_read: Vec<NetworkEnvelope>,
    ) -> Result<ConnectionSetup, ConnectionError> {
        let initial_envelopes = if already_read.is_empty() {
            channel.read_envelopes().await.map_err(|e| match e {
                ConnectionError::ConnectionClosed => ConnectionError::EmptyInitialEnvelopes,
                other => other,
            })?
        } else {
            already_read
        };

        let my_network_load = self.context.network_load.current();
        let mut responder = ConnectionHandshakeResponder::new(
            Arc::clone(&self.context.ban_list),
            self.context.my_capability.clone(),
            my_network_load,
            Arc::clone(&self.context.authorization_service),
            initial_envelopes,
        );
        let outcome = tokio::task::spawn_blocking(move || responder.verify_and_build_respond())
            .await
            .map_err(|_| ConnectionError::Cancelled)??;

        channel.write_envelope(&outcome.response_envelope).await?;

        Ok(ConnectionSetup {
            id,
            direction: ConnectionDirection::Inbound,
            peer_capability: outcome.peer_capability,
            peer_network_load: outcome.peer_network_load,
            my_address: self.context.my_capability.address().clone(),
            my_network_load,
            authorization_service: Arc::clone(&self.context.authorization_service),
        })
    }

    fn promote<C: ByteChannel + 'static>(
        &self,
        setup: ConnectionSetup,
        mut channel: NetworkEnvelopeChannel<C>,
    ) -> Result<Connection, ConnectionError> {
        let handler = match self.context.handler() {
            Some(handler) if handler.is_accepting() && !self.is_closed() => handler,
            _ => {
                debug!(connection = %setup.id, "Owner not accepting, dropping handshaken socket");
                channel.close();
                return Err(ConnectionError::NotRunning);
            }
        };
        let peer = setup.peer_capability.clone();
        let (connection, _task) = task::start(setup, channel, handler, Vec::new());
        self.established
            .lock()
            .insert(connection.id(), connection.clone());
        info!(connection = %connection.id(), peer = %peer, "Inbound connection established");
        Ok(connection)
    }

    /// Established inbound connections that are still open.
    pub fn connections(&self) -> Vec<Connection> {
        self.established
            .lock()
            .values()
            .filter(|c| c.is_open())
            .cloned()
            .collect()
    }

    /// Every tracked connection, including ones closing but not yet forgotten.
    pub fn tracked_connections(&self) -> Vec<Connection> {
        self.established.lock().values().cloned().collect()
    }

    /// No socket in handshake and no connection tracked.
    pub fn is_idle(&self) -> bool {
        self.in_handshake.lock().is_empty() && self.established.lock().is_empty()
    }

    pub fn get_connection(&self, id: ConnectionId) -> Option<Connection> {
        self.established.lock().get(&id).cloned()
    }

    /// Stop tracking a closed connection.
    pub fn forget(&self, id: ConnectionId) -> Option<Connection> {
        self.established.lock().remove(&id)
    }
}

impl std::fmt::Debug for InboundConnectionsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundConnectionsManager")
            .field("local_addr", &self.local_addr)
            .field("in_handshake", &self.in_handshake.lock().len())
            .field("established", &self.established.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
