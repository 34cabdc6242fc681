//! Domain layer: value types, wire messages and errors. No I/O.

pub mod address;
pub mod error;
pub mod message;
pub mod network_load;
pub mod token;

pub use address::{Address, AddressParseError, Capability, NetworkId, TransportType, LOCALHOST};
pub use error::{ConnectionError, ConnectionErrorReason};
pub use message::{
    CloseReason, ConnectionHandshakeRequest, ConnectionHandshakeResponse, NetworkEnvelope,
    NetworkMessage, OpaqueMessage, CLOSE_COST_FACTOR, DEFAULT_COST_FACTOR,
    HANDSHAKE_COST_FACTOR, PROTOCOL_VERSION,
};
pub use network_load::{
    calculate_load, ConnectionMetrics, ConnectionMetricsSnapshot, NetworkLoad,
    NetworkLoadSnapshot, MAX_CALCULATED_LOAD, MAX_DIFFICULTY_ADJUSTMENT,
};
pub use token::{AuthorizationToken, ProofOfWork};
