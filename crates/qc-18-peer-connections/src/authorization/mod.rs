//! # Authorization
//!
//! Every envelope carries an [`AuthorizationToken`](crate::domain::AuthorizationToken):
//! a proof of work bound to the serialized message, the receiver's address
//! and a per-connection counter. The required difficulty grows with the
//! load the receiver reports, so a busy node makes its senders work harder.
//!
//! - [`pow`]: the proof-of-work contract and SHA-256 hashcash
//! - [`service`]: token creation, verification, difficulty
//! - [`replay`]: per-connection counter guard

pub mod pow;
pub mod replay;
pub mod service;

pub use pow::{sha256, HashCashProofOfWorkService, ProofOfWorkService};
pub use replay::MessageCounterGuard;
pub use service::{AuthorizationConfig, AuthorizationService};
