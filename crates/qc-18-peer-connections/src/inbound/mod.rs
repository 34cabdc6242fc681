//! # Inbound Connections
//!
//! Accept loop plus the responder side of the handshake. The first read on
//! an accepted socket must contain exactly one `ConnectionHandshake`
//! request; anything else closes the socket silently.

pub mod manager;

pub use manager::InboundConnectionsManager;
