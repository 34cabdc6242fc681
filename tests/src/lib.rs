//! # Quantum-Chain Test Suite
//!
//! Peer connection tests over real TCP sockets on `127.0.0.1:0`.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs       # Shared clients and listeners
//! ├── exploits/         # Misbehaving peers
//! │   └── qc_18/
//! └── integration/      # Handshakes and node-to-node messaging
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p qc-tests
//!
//! # By category
//! cargo test -p qc-tests integration::
//! cargo test -p qc-tests exploits::
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod exploits;
pub mod fixtures;
pub mod integration;
