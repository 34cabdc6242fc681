//! Authorization token carried in every envelope.

use serde::{Deserialize, Serialize};

/// Hashcash-style proof of work.
///
/// `payload_hash` and `challenge` bind the proof to one message and one
/// receiver; `difficulty` is what the minter claims to have satisfied and
/// `counter` is the solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofOfWork {
    pub payload_hash: [u8; 32],
    pub challenge: [u8; 32],
    pub counter: u64,
    pub difficulty: f64,
}

/// Proof of work plus the sender's per-connection message counter.
///
/// Counter `0` is reserved for handshake messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationToken {
    pub proof_of_work: ProofOfWork,
    pub message_counter: u32,
}

impl AuthorizationToken {
    pub fn new(proof_of_work: ProofOfWork, message_counter: u32) -> Self {
        Self {
            proof_of_work,
            message_counter,
        }
    }

    pub fn difficulty(&self) -> f64 {
        self.proof_of_work.difficulty
    }
}
