//! # Outbound Connections
//!
//! - [`OutboundConnectionManager`]: dial, handshake as initiator, track by
//!   dialed address
//! - [`OutboundConnectionMultiplexer`]: one attempt per address, shared by
//!   every concurrent caller through [`PendingConnection`] futures

pub mod manager;
pub mod multiplexer;

pub use manager::OutboundConnectionManager;
pub use multiplexer::{OutboundConnectionMultiplexer, PendingConnection};
