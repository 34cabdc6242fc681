//! Connection-level error type.
//!
//! Every handshake and framing failure surfaces as a [`ConnectionError`].
//! None of them are retried here; whoever owns the socket closes it.

use thiserror::Error;

use super::address::Address;

/// Handshake, authorization and framing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The responder ran before the peer delivered anything.
    #[error("Initial envelopes are empty")]
    EmptyInitialEnvelopes,

    /// A well-behaved initiator sends one request and waits.
    #[error("Peer sent multiple ConnectionHandshake requests ({count} envelopes)")]
    MultipleConcurrentRequests { count: usize },

    #[error("Invalid version. expected={expected} received={received}")]
    InvalidVersion { expected: i32, received: i32 },

    #[error("Received message is not a {expected} (got {received})")]
    UnexpectedMessageType {
        expected: &'static str,
        received: String,
    },

    #[error("Peer {address} is in quarantine")]
    PeerBanned { address: Address },

    #[error("Message authorization failed: {context}")]
    AuthorizationFailed { context: String },

    /// Message counter did not advance.
    #[error("Message authorization failed: counter {counter} is not above {last}")]
    Replay { counter: u32, last: u32 },

    /// A complete frame that does not decode as an envelope.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Envelope of {size} bytes exceeds the limit of {max} bytes")]
    EnvelopeTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connecting to {address} timed out")]
    ConnectTimeout { address: Address },

    #[error("Handshake with {peer} timed out")]
    HandshakeTimeout { peer: String },

    #[error("Connection attempt was cancelled")]
    Cancelled,

    #[error("Node is not running")]
    NotRunning,
}

/// Stable reason code for upper layers (scoring, reconnect policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionErrorReason {
    EmptyInitialEnvelopes,
    MultipleConcurrentRequests,
    InvalidVersion,
    UnexpectedMessageType,
    PeerBanned,
    AuthorizationFailed,
    MalformedEnvelope,
    Io,
    Timeout,
    Closed,
}

impl ConnectionError {
    pub fn reason(&self) -> ConnectionErrorReason {
        match self {
            Self::EmptyInitialEnvelopes => ConnectionErrorReason::EmptyInitialEnvelopes,
            Self::MultipleConcurrentRequests { .. } => {
                ConnectionErrorReason::MultipleConcurrentRequests
            }
            Self::InvalidVersion { .. } => ConnectionErrorReason::InvalidVersion,
            Self::UnexpectedMessageType { .. } => ConnectionErrorReason::UnexpectedMessageType,
            Self::PeerBanned { .. } => ConnectionErrorReason::PeerBanned,
            Self::AuthorizationFailed { .. } | Self::Replay { .. } => {
                ConnectionErrorReason::AuthorizationFailed
            }
            Self::MalformedEnvelope(_) | Self::EnvelopeTooLarge { .. } => {
                ConnectionErrorReason::MalformedEnvelope
            }
            Self::Io(_) => ConnectionErrorReason::Io,
            Self::ConnectTimeout { .. } | Self::HandshakeTimeout { .. } => {
                ConnectionErrorReason::Timeout
            }
            Self::ConnectionClosed | Self::Cancelled | Self::NotRunning => {
                ConnectionErrorReason::Closed
            }
        }
    }

    /// Whether the failure says something about the peer's behaviour, as
    /// opposed to local or transport conditions.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self.reason(),
            ConnectionErrorReason::EmptyInitialEnvelopes
                | ConnectionErrorReason::MultipleConcurrentRequests
                | ConnectionErrorReason::InvalidVersion
                | ConnectionErrorReason::UnexpectedMessageType
                | ConnectionErrorReason::AuthorizationFailed
                | ConnectionErrorReason::MalformedEnvelope
        )
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<bincode::Error> for ConnectionError {
    fn from(error: bincode::Error) -> Self {
        Self::MalformedEnvelope(error.to_string())
    }
}
