//! # Connection Handshake
//!
//! Two messages authenticate a new socket:
//!
//! ```text
//! Initiator                                   Responder
//!    │── Request{capability, load}  (token → responder addr) ──►│
//!    │                                   count/version/type/ban/auth
//!    │◄── Response{capability, load} (token → initiator addr) ──│
//!  version/type/ban/auth
//! ```
//!
//! Both messages carry message counter `0`; application messages start at `1`.

pub mod initiator;
pub mod responder;

pub use initiator::ConnectionHandshakeInitiator;
pub use responder::{ConnectionHandshakeResponder, ResponderResult, ResponderState};

/// Message counter of both handshake messages.
pub const HANDSHAKE_MESSAGE_COUNTER: u32 = 0;
