//! Wire messages and the envelope that frames them.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::address::Capability;
use super::error::ConnectionError;
use super::network_load::NetworkLoad;
use super::token::AuthorizationToken;

/// Envelope version this implementation speaks. Anything else is rejected.
pub const PROTOCOL_VERSION: i32 = 1;

/// Cost factor of handshake messages.
pub const HANDSHAKE_COST_FACTOR: f64 = 0.05;
/// Cost factor of close notifications.
pub const CLOSE_COST_FACTOR: f64 = 0.01;
/// Cost factor of every pass-through message.
pub const DEFAULT_COST_FACTOR: f64 = 0.5;

// =============================================================================
// HANDSHAKE MESSAGES
// =============================================================================

/// First message on a new socket, sent by the initiator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionHandshakeRequest {
    pub capability: Capability,
    pub network_load: NetworkLoad,
}

/// Responder's answer to a valid [`ConnectionHandshakeRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionHandshakeResponse {
    pub capability: Capability,
    pub network_load: NetworkLoad,
}

// =============================================================================
// CLOSE REASON
// =============================================================================

/// Why a connection went away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// The peer sent a `CloseConnection` message.
    CloseMessageReceived,
    /// The peer closed the socket without saying goodbye.
    PeerClosed,
    /// Closed on request of a local caller.
    LocalInitiated,
    /// The local node is shutting down.
    Shutdown,
    /// The peer sent an envelope that failed authorization.
    Unauthorized,
    /// I/O or protocol failure.
    Exception(String),
}

impl CloseReason {
    /// Closed deliberately by one side rather than by a failure.
    pub fn is_graceful(&self) -> bool {
        matches!(
            self,
            Self::CloseMessageReceived | Self::LocalInitiated | Self::Shutdown
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CloseMessageReceived => f.write_str("close message received"),
            Self::PeerClosed => f.write_str("peer closed the socket"),
            Self::LocalInitiated => f.write_str("closed locally"),
            Self::Shutdown => f.write_str("node shutdown"),
            Self::Unauthorized => f.write_str("unauthorized message"),
            Self::Exception(reason) => write!(f, "error: {}", reason),
        }
    }
}

impl From<ConnectionError> for CloseReason {
    fn from(error: ConnectionError) -> Self {
        match error {
            ConnectionError::ConnectionClosed => Self::PeerClosed,
            ConnectionError::AuthorizationFailed { .. } | ConnectionError::Replay { .. } => {
                Self::Unauthorized
            }
            other => Self::Exception(other.to_string()),
        }
    }
}

// =============================================================================
// NETWORK MESSAGE
// =============================================================================

/// Application payload this layer does not interpret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueMessage {
    pub kind: String,
    pub payload: Vec<u8>,
}

impl OpaqueMessage {
    pub fn new(kind: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
        }
    }
}

/// Closed set of messages an envelope can carry.
///
/// Only the handshake and close variants are inspected here; `Opaque` is
/// handed to upper layers untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NetworkMessage {
    ConnectionHandshakeRequest(ConnectionHandshakeRequest),
    ConnectionHandshakeResponse(ConnectionHandshakeResponse),
    CloseConnection { reason: CloseReason },
    Opaque(OpaqueMessage),
}

impl NetworkMessage {
    /// Share of the target difficulty this message type costs to send.
    pub fn cost_factor(&self) -> f64 {
        match self {
            Self::ConnectionHandshakeRequest(_) | Self::ConnectionHandshakeResponse(_) => {
                HANDSHAKE_COST_FACTOR
            }
            Self::CloseConnection { .. } => CLOSE_COST_FACTOR,
            Self::Opaque(_) => DEFAULT_COST_FACTOR,
        }
    }

    /// Short name for logs and error messages.
    pub fn kind(&self) -> &str {
        match self {
            Self::ConnectionHandshakeRequest(_) => "ConnectionHandshake request",
            Self::ConnectionHandshakeResponse(_) => "ConnectionHandshake response",
            Self::CloseConnection { .. } => "CloseConnection",
            Self::Opaque(message) => &message.kind,
        }
    }

    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            Self::ConnectionHandshakeRequest(_) | Self::ConnectionHandshakeResponse(_)
        )
    }

    /// Canonical bytes a proof of work is bound to.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ConnectionError> {
        Ok(bincode::serialize(self)?)
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// Outermost wire unit: protocol version, authorization token, one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEnvelope {
    pub version: i32,
    pub authorization_token: AuthorizationToken,
    pub message: NetworkMessage,
}

impl NetworkEnvelope {
    /// Envelope at the current [`PROTOCOL_VERSION`].
    pub fn new(authorization_token: AuthorizationToken, message: NetworkMessage) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            authorization_token,
            message,
        }
    }

    pub fn verify_version(&self) -> Result<(), ConnectionError> {
        if self.version != PROTOCOL_VERSION {
            return Err(ConnectionError::InvalidVersion {
                expected: PROTOCOL_VERSION,
                received: self.version,
            });
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ConnectionError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConnectionError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
