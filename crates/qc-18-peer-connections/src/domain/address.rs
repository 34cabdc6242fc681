//! Peer identity value types: [`Address`], [`TransportType`], [`Capability`], [`NetworkId`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Host used by [`Address::localhost`].
pub const LOCALHOST: &str = "127.0.0.1";

/// Routable identity of a peer (`host:port`).
///
/// Value-equal; used as the ban-list key and as the receiver identity that
/// authorization tokens are bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    /// Create an address from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Loopback address with an explicit port.
    pub fn localhost(port: u16) -> Self {
        Self::new(LOCALHOST, port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Same host, different port.
    #[must_use]
    pub fn with_port(&self, port: u16) -> Self {
        Self::new(self.host.clone(), port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error parsing an [`Address`] from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressParseError {
    #[error("address '{0}' is missing a ':port' suffix")]
    MissingPort(String),
    #[error("address '{0}' has an empty host")]
    EmptyHost(String),
    #[error("address '{input}' has an invalid port: {reason}")]
    InvalidPort { input: String, reason: String },
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressParseError::MissingPort(s.to_string()))?;
        if host.is_empty() {
            return Err(AddressParseError::EmptyHost(s.to_string()));
        }
        let port = port.parse::<u16>().map_err(|e| AddressParseError::InvalidPort {
            input: s.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(host, port))
    }
}

/// Transport a peer can be reached over. Selection itself happens elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransportType {
    Clear,
    Tor,
    I2p,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Clear => "CLEAR",
            Self::Tor => "TOR",
            Self::I2p => "I2P",
        };
        f.write_str(name)
    }
}

/// A peer's advertised address and supported transports.
///
/// The transport set is ordered so the serialized form, and therefore any
/// proof of work bound to it, is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability {
    address: Address,
    supported_transport_types: BTreeSet<TransportType>,
}

impl Capability {
    pub fn new(address: Address, transports: impl IntoIterator<Item = TransportType>) -> Self {
        Self {
            address,
            supported_transport_types: transports.into_iter().collect(),
        }
    }

    /// Clearnet-only capability.
    pub fn clear(address: Address) -> Self {
        Self::new(address, [TransportType::Clear])
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn supported_transport_types(&self) -> &BTreeSet<TransportType> {
        &self.supported_transport_types
    }

    pub fn supports(&self, transport: TransportType) -> bool {
        self.supported_transport_types.contains(&transport)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transports: Vec<String> = self
            .supported_transport_types
            .iter()
            .map(ToString::to_string)
            .collect();
        write!(f, "{} [{}]", self.address, transports.join(","))
    }
}

/// Local identity a [`Node`](crate::node::Node) runs under; passed to
/// listeners with every inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkId(String);

impl NetworkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
