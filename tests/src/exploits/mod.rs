//! # Exploit Simulations
//!
//! Peers that complete a valid handshake and then misbehave on the wire.
//! Each test checks that the node drops the offender with the right close
//! reason and keeps serving everybody else.
//!
//! Organized by target subsystem:
//!
//! - `qc_18`: peer connections (authorization, framing, replay)

pub mod qc_18;
