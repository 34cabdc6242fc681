//! # Ports Layer - Hexagonal Architecture Boundaries
//!
//! - **Driving Ports (Inbound):** callbacks this crate invokes on its owners
//! - **Driven Ports (Outbound):** collaborators this crate requires

pub mod inbound;
pub mod outbound;

pub use inbound::{ConnectionHandler, NodeListener};
pub use outbound::{BanList, ByteChannel};
