//! Dials peers and runs the initiator side of the handshake.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::adapters::TcpChannel;
use crate::codec::NetworkEnvelopeChannel;
use crate::connection::task;
use crate::connection::{
    Connection, ConnectionContext, ConnectionDirection, ConnectionId, ConnectionSetup,
};
use crate::domain::{
    Address, Capability, CloseReason, ConnectionError, ConnectionHandshakeResponse,
    NetworkEnvelope,
};
use crate::handshake::ConnectionHandshakeInitiator;
use crate::ports::ByteChannel;

/// Marks an address as being dialed for as long as it lives.
struct InProgressGuard<'a> {
    in_progress: &'a Mutex<HashSet<Address>>,
    address: Address,
}

impl<'a> InProgressGuard<'a> {
    fn new(in_progress: &'a Mutex<HashSet<Address>>, address: Address) -> Self {
        in_progress.lock().insert(address.clone());
        Self {
            in_progress,
            address,
        }
    }
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.in_progress.lock().remove(&self.address);
    }
}

/// Outbound side of the node: one connection per dialed address.
///
/// Deduplication of concurrent requests for the same address is the
/// multiplexer's job; this type assumes one attempt per address at a time.
pub struct OutboundConnectionManager {
    context: ConnectionContext,
    connections: Mutex<HashMap<Address, Connection>>,
    in_progress: Mutex<HashSet<Address>>,
}

impl OutboundConnectionManager {
    pub fn new(context: ConnectionContext) -> Self {
        Self {
            context,
            connections: Mutex::new(HashMap::new()),
            in_progress: Mutex::new(HashSet::new()),
        }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    /// Connect to `capability` over TCP and complete the handshake.
    ///
    /// Returns the existing connection if one is already open.
    pub async fn create_new_connection(
        &self,
        capability: &Capability,
    ) -> Result<Connection, ConnectionError> {
        let address = capability.address();
        if self.context.ban_list.is_banned(address) {
            return Err(ConnectionError::PeerBanned {
                address: address.clone(),
            });
        }
        if let Some(existing) = self.get_connection(address) {
            return Ok(existing);
        }

        let _guard = InProgressGuard::new(&self.in_progress, address.clone());
        debug!(peer = %address, "Dialing");
        let stream = tokio::time::timeout(
            self.context.connect_timeout,
            TcpStream::connect((address.host(), address.port())),
        )
        .await
        .map_err(|_| ConnectionError::ConnectTimeout {
            address: address.clone(),
        })??;

        self.establish(address, TcpChannel::new(stream)).await
    }

    /// Run the initiator handshake over an already connected channel.
    pub async fn establish<C: ByteChannel + 'static>(
        &self,
        address: &Address,
        channel: C,
    ) -> Result<Connection, ConnectionError> {
        let mut channel = NetworkEnvelopeChannel::with_config(channel, self.context.envelope_config);
        let my_network_load = self.context.network_load.current();
        let initiator = Arc::new(ConnectionHandshakeInitiator::new(
            self.context.my_capability.clone(),
            my_network_load,
            Arc::clone(&self.context.authorization_service),
            Arc::clone(&self.context.ban_list),
            address.clone(),
        ));

        let handshake = tokio::time::timeout(
            self.context.handshake_timeout,
            Self::initiate(Arc::clone(&initiator), &mut channel),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ConnectionError::HandshakeTimeout {
                peer: address.to_string(),
            })
        });

        let (response, backlog) = match handshake {
            Ok(result) => result,
            Err(e) => {
                warn!(peer = %address, error = %e, "Outbound handshake failed");
                channel.close();
                return Err(e);
            }
        };

        let handler = match self.context.handler() {
            Some(handler) if handler.is_accepting() => handler,
            _ => {
                channel.close();
                return Err(ConnectionError::NotRunning);
            }
        };
        let setup = ConnectionSetup {
            id: ConnectionId::new(),
            direction: ConnectionDirection::Outbound,
            peer_capability: response.capability,
            peer_network_load: response.network_load,
            my_address: self.context.my_capability.address().clone(),
            my_network_load,
            authorization_service: Arc::clone(&self.context.authorization_service),
        };
        let (connection, _task) = task::start(setup, channel, handler, backlog);
        let replaced = self
            .connections
            .lock()
            .insert(address.clone(), connection.clone());
        if let Some(replaced) = replaced.filter(|c| c.id() != connection.id()) {
            debug!(connection = %replaced.id(), peer = %address, "Dropping superseded connection");
            replaced.abort(CloseReason::LocalInitiated);
        }
        info!(connection = %connection.id(), peer = %address, "Outbound connection established");
        Ok(connection)
    }

    /// Write the request, then read until the response arrives. Envelopes
    /// that came in behind the response are returned for later delivery.
    async fn initiate<C: ByteChannel + 'static>(
        initiator: Arc<ConnectionHandshakeInitiator>,
        channel: &mut NetworkEnvelopeChannel<C>,
    ) -> Result<(ConnectionHandshakeResponse, Vec<(NetworkEnvelope, usize)>), ConnectionError> {
        let minting = Arc::clone(&initiator);
        let request = tokio::task::spawn_blocking(move || minting.initiate())
            .await
            .map_err(|_| ConnectionError::Cancelled)??;
        channel.write_envelope(&request).await?;

        let mut envelopes = channel.read_sized().await?.into_iter();
        let (first, _) = envelopes
            .next()
            .ok_or(ConnectionError::EmptyInitialEnvelopes)?;
        let response = initiator.finish(&first)?;
        Ok((response, envelopes.collect()))
    }

    /// Open connection to `address`, if any.
    pub fn get_connection(&self, address: &Address) -> Option<Connection> {
        self.connections
            .lock()
            .get(address)
            .filter(|c| c.is_open())
            .cloned()
    }

    pub fn all_outbound_connections(&self) -> Vec<Connection> {
        self.connections
            .lock()
            .values()
            .filter(|c| c.is_open())
            .cloned()
            .collect()
    }

    pub fn is_connecting(&self, address: &Address) -> bool {
        self.in_progress.lock().contains(address)
    }

    /// Every tracked connection, including ones closing but not yet removed.
    pub fn tracked_connections(&self) -> Vec<Connection> {
        self.connections.lock().values().cloned().collect()
    }

    /// No dial in flight and no connection tracked.
    pub fn is_idle(&self) -> bool {
        self.in_progress.lock().is_empty() && self.connections.lock().is_empty()
    }

    /// Stop tracking the connection with `id`.
    pub fn remove_connection(&self, id: ConnectionId) -> Option<Connection> {
        let mut connections = self.connections.lock();
        let address = connections
            .iter()
            .find(|(_, c)| c.id() == id)
            .map(|(address, _)| address.clone())?;
        connections.remove(&address)
    }
}

impl std::fmt::Debug for OutboundConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundConnectionManager")
            .field("connections", &self.connections.lock().len())
            .field("in_progress", &self.in_progress.lock().len())
            .finish()
    }
}
