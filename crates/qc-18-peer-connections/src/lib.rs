//! # Peer Connections Subsystem
//!
//! **Subsystem ID:** 18
//!
//! Connection establishment and wire framing between Quantum-Chain peers.
//! Every message on the wire carries a proof of work bound to the message,
//! the receiver's address, the receiver's declared network load and a
//! per-connection counter. A busy node therefore makes itself more
//! expensive to talk to without any coordination.
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture with:
//! - **Domain Layer:** addresses, capabilities, messages, envelopes, load
//! - **Authorization:** proof-of-work tokens and difficulty scaling
//! - **Codec:** varint-framed envelopes with partial-read reassembly
//! - **Handshake:** initiator and single-shot responder state machines
//! - **Connection:** per-connection task behind a cloneable handle
//! - **Inbound / Outbound:** accept loop, dialer and request multiplexer
//! - **Node:** owns everything and notifies listeners
//! - **Ports Layer:** handler, listener, byte channel and ban list traits
//! - **Adapters Layer:** TCP and in-memory channels, ban lists
//!
//! ## Wire Format
//!
//! ```text
//! ┌──────────────┬───────────────────────────────────────────────┐
//! │ varint(len)  │ bincode(NetworkEnvelope)                      │
//! │ 1-5 bytes    │ version | authorization_token | message       │
//! └──────────────┴───────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use qc_18_peer_connections::{
//!     Capability, Address, NetworkMessage, Node, NodeConfig, OpaqueMessage,
//! };
//!
//! # async fn run() -> Result<(), qc_18_peer_connections::ConnectionError> {
//! let node = Node::new(NodeConfig::for_testing());
//! node.initialize().await?;
//!
//! let peer = Capability::clear(Address::localhost(7481));
//! let message = NetworkMessage::Opaque(OpaqueMessage::new("ping", b"hi".to_vec()));
//! node.send(message, &peer).await?;
//!
//! node.shutdown().await;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// CORE MODULES
// =============================================================================

pub mod authorization;
pub mod codec;
pub mod domain;
pub mod handshake;
pub mod ports;

// =============================================================================
// RUNTIME MODULES
// =============================================================================

pub mod adapters;
pub mod connection;
pub mod inbound;
pub mod node;
pub mod outbound;


// =============================================================================
// RE-EXPORTS
// =============================================================================

// Domain entities
pub use domain::{
    Address, AddressParseError, AuthorizationToken, Capability, CloseReason, ConnectionError,
    ConnectionHandshakeRequest, ConnectionHandshakeResponse, ConnectionMetricsSnapshot,
    NetworkEnvelope, NetworkId, NetworkLoad, NetworkMessage, OpaqueMessage, ProofOfWork,
    TransportType, PROTOCOL_VERSION,
};

// Authorization
pub use authorization::{
    AuthorizationConfig, AuthorizationService, HashCashProofOfWorkService, ProofOfWorkService,
};

// Framing
pub use codec::{EnvelopeConfig, NetworkEnvelopeChannel};

// Handshake
pub use handshake::{ConnectionHandshakeInitiator, ConnectionHandshakeResponder, ResponderResult};

// Connections
pub use connection::{Connection, ConnectionDirection, ConnectionId};
pub use inbound::InboundConnectionsManager;
pub use outbound::{OutboundConnectionManager, OutboundConnectionMultiplexer, PendingConnection};

// Node
pub use node::{ConfigError, NetworkLoadService, Node, NodeConfig, NodeState};

// Port traits
pub use ports::{BanList, ByteChannel, ConnectionHandler, NodeListener};

// Adapters
pub use adapters::{InMemoryBanList, NoOpBanList, TcpChannel};

#[cfg(any(test, feature = "test-utils"))]
pub use adapters::MemoryChannel;
