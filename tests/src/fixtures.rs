//! # Shared Test Fixtures
//!
//! Running nodes with a channel-backed listener, and a hand-driven TCP
//! peer that performs the handshake itself so tests can put arbitrary
//! bytes on the wire afterwards.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;

use qc_18_peer_connections::codec::encode_varint;
use qc_18_peer_connections::{
    Address, AuthorizationConfig, AuthorizationService, ByteChannel, Capability, CloseReason,
    Connection, ConnectionError, ConnectionHandshakeInitiator, ConnectionHandshakeResponse,
    HashCashProofOfWorkService, NetworkEnvelope, NetworkEnvelopeChannel, NetworkId, NetworkLoad,
    NetworkMessage, Node, NodeConfig, NodeListener, NodeState, NoOpBanList, OpaqueMessage,
    TcpChannel,
};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Authorization service matching [`NodeConfig::for_testing`].
pub fn test_auth() -> Arc<AuthorizationService> {
    Arc::new(AuthorizationService::new(
        Arc::new(HashCashProofOfWorkService::new()),
        AuthorizationConfig::for_testing(),
    ))
}

pub fn ping(payload: &[u8]) -> NetworkMessage {
    NetworkMessage::Opaque(OpaqueMessage::new("ping", payload.to_vec()))
}

// =============================================================================
// NODE LISTENER
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Connected(Address),
    Message(Address, NetworkMessage),
    Disconnected(Address, CloseReason),
    State(NodeState),
    Shutdown,
}

pub struct ChannelListener {
    events: mpsc::UnboundedSender<NodeEvent>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<NodeEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { events }), receiver)
    }
}

impl NodeListener for ChannelListener {
    fn on_message(&self, message: &NetworkMessage, connection: &Connection, _network_id: &NetworkId) {
        let _ = self.events.send(NodeEvent::Message(
            connection.peer_address().clone(),
            message.clone(),
        ));
    }

    fn on_connection(&self, connection: &Connection) {
        let _ = self
            .events
            .send(NodeEvent::Connected(connection.peer_address().clone()));
    }

    fn on_disconnect(&self, connection: &Connection, close_reason: &CloseReason) {
        let _ = self.events.send(NodeEvent::Disconnected(
            connection.peer_address().clone(),
            close_reason.clone(),
        ));
    }

    fn on_state_change(&self, state: NodeState) {
        let _ = self.events.send(NodeEvent::State(state));
    }

    fn on_shutdown(&self) {
        let _ = self.events.send(NodeEvent::Shutdown);
    }
}

/// Next event that is not a state change.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<NodeEvent>) -> NodeEvent {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await.expect("listener dropped") {
                NodeEvent::State(_) => continue,
                event => return event,
            }
        }
    })
    .await
    .expect("timed out waiting for node event")
}

pub async fn start_node(node: Node) -> (Node, mpsc::UnboundedReceiver<NodeEvent>) {
    let (listener, events) = ChannelListener::new();
    node.add_listener(listener);
    node.initialize().await.expect("node failed to start");
    (node, events)
}

pub async fn running_node() -> (Node, mpsc::UnboundedReceiver<NodeEvent>) {
    start_node(Node::new(NodeConfig::for_testing())).await
}

// =============================================================================
// RAW PEER
// =============================================================================

/// Handshake request bound to `receiver`, from a peer advertising `my_port`.
pub fn handshake_initiator(my_port: u16, receiver: &Address) -> ConnectionHandshakeInitiator {
    ConnectionHandshakeInitiator::new(
        Capability::clear(Address::localhost(my_port)),
        NetworkLoad::INITIAL,
        test_auth(),
        Arc::new(NoOpBanList),
        receiver.clone(),
    )
}

pub async fn dial(address: &Address) -> NetworkEnvelopeChannel<TcpChannel> {
    let stream = TcpStream::connect((address.host(), address.port()))
        .await
        .expect("connect failed");
    NetworkEnvelopeChannel::new(TcpChannel::new(stream))
}

/// Client that speaks the wire protocol by hand.
pub struct RawPeer {
    pub channel: NetworkEnvelopeChannel<TcpChannel>,
    pub capability: Capability,
    pub response: ConnectionHandshakeResponse,
    pub request: NetworkEnvelope,
    auth: Arc<AuthorizationService>,
    next_counter: u32,
}

impl RawPeer {
    /// Dial `node` and complete the handshake as a peer advertising `my_port`.
    pub async fn connect(node: &Capability, my_port: u16) -> Self {
        let mut channel = dial(node.address()).await;
        let initiator = handshake_initiator(my_port, node.address());
        let request = initiator.initiate().expect("mint request");
        channel.write_envelope(&request).await.expect("write request");

        let envelopes = channel.read_envelopes().await.expect("read response");
        assert_eq!(envelopes.len(), 1, "expected exactly one response");
        let response = initiator.finish(&envelopes[0]).expect("valid response");

        Self {
            channel,
            capability: Capability::clear(Address::localhost(my_port)),
            response,
            request,
            auth: test_auth(),
            next_counter: 1,
        }
    }

    pub fn address(&self) -> &Address {
        self.capability.address()
    }

    /// Envelope for `message` addressed to `receiver` with `counter`.
    pub fn envelope(&self, message: NetworkMessage, receiver: &Address, counter: u32) -> NetworkEnvelope {
        let token = self
            .auth
            .create_token(&message, &self.response.network_load, receiver, counter)
            .expect("mint token");
        NetworkEnvelope::new(token, message)
    }

    /// Properly authorized envelope with the next counter.
    pub fn next_envelope(&mut self, message: NetworkMessage) -> NetworkEnvelope {
        let counter = self.next_counter;
        self.next_counter += 1;
        let receiver = self.response.capability.address().clone();
        self.envelope(message, &receiver, counter)
    }

    pub async fn send(&mut self, message: NetworkMessage) {
        let envelope = self.next_envelope(message);
        self.write(&envelope).await;
    }

    pub async fn write(&mut self, envelope: &NetworkEnvelope) {
        self.channel
            .write_envelope(envelope)
            .await
            .expect("write envelope");
    }

    /// Length-prefixed frame around arbitrary bytes.
    pub async fn write_frame(&mut self, length: u32, body: &[u8]) -> io::Result<()> {
        let mut frame = Vec::new();
        encode_varint(length, &mut frame);
        frame.extend_from_slice(body);
        self.write_raw(&frame).await
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        let channel = self.channel.channel_mut();
        let mut written = 0;
        while written < bytes.len() {
            channel.writable().await?;
            match channel.try_write(&bytes[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Resolves once the node has closed the socket. Envelopes read on the
    /// way are returned.
    pub async fn closed_by_node(&mut self) -> Vec<NetworkEnvelope> {
        let mut received = Vec::new();
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                match self.channel.read_envelopes().await {
                    Ok(envelopes) => received.extend(envelopes),
                    // A reset counts as closed
                    Err(ConnectionError::ConnectionClosed) | Err(ConnectionError::Io(_)) => return,
                    Err(e) => panic!("unexpected read error {:?}", e),
                }
            }
        })
        .await
        .expect("node did not close the socket");
        received
    }
}
