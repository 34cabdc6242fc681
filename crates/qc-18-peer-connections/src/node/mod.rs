//! # Node
//!
//! Ties the inbound manager, the outbound multiplexer and the load service
//! together behind one [`Node`] handle and fans connection events out to
//! registered [`NodeListener`](crate::ports::NodeListener)s.
//!
//! The node is the [`ConnectionHandler`](crate::ports::ConnectionHandler)
//! of every connection it owns: it authorizes post-handshake envelopes
//! against its own declared load (current or previous snapshot) and its own
//! address, and forgets connections once they close.

pub mod config;
pub mod load;
pub mod service;
pub mod state;

pub use config::{ConfigError, NodeConfig, DEFAULT_LISTEN_PORT};
pub use load::NetworkLoadService;
pub use service::Node;
pub use state::NodeState;
