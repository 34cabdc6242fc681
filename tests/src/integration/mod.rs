//! # Integration Tests
//!
//! Peer connection flows between real sockets:
//!
//! - `handshake_flows`: concurrent inbound handshakes against a running node
//! - `node_messaging`: node-to-node delivery, dedup and shutdown

pub mod handshake_flows;
pub mod node_messaging;
