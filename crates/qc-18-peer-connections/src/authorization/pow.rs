//! Proof-of-work service contract and the SHA-256 hashcash implementation.

use sha2::{Digest, Sha256};

use crate::domain::ProofOfWork;

/// Mints and verifies proofs of work.
///
/// The only contract this layer relies on: minting is deterministic for a
/// given `(payload, challenge, difficulty)` and `verify` accepts exactly
/// what `mint` produces. Higher difficulty means more work.
pub trait ProofOfWorkService: Send + Sync {
    fn mint(&self, payload: &[u8], challenge: &[u8; 32], difficulty: f64) -> ProofOfWork;

    fn verify(&self, proof_of_work: &ProofOfWork) -> bool;
}

/// SHA-256 over arbitrary parts.
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Hashcash: find `counter` such that
/// `SHA256(payload_hash || challenge || counter)` has at least
/// `ceil(log2(difficulty))` leading zero bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashCashProofOfWorkService;

impl HashCashProofOfWorkService {
    pub fn new() -> Self {
        Self
    }

    /// Leading zero bits demanded for a difficulty.
    pub fn required_zero_bits(difficulty: f64) -> u32 {
        if difficulty.is_nan() || difficulty <= 1.0 {
            return 0;
        }
        (difficulty.log2().ceil() as u32).min(256)
    }

    fn hash(payload_hash: &[u8; 32], challenge: &[u8; 32], counter: u64) -> [u8; 32] {
        sha256(&[payload_hash, challenge, &counter.to_be_bytes()])
    }

    /// Count leading zero bits in a byte slice.
    pub(crate) fn count_leading_zero_bits(bytes: &[u8]) -> u32 {
        let mut count = 0u32;
        for byte in bytes {
            if *byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros();
                break;
            }
        }
        count
    }
}

impl ProofOfWorkService for HashCashProofOfWorkService {
    fn mint(&self, payload: &[u8], challenge: &[u8; 32], difficulty: f64) -> ProofOfWork {
        let payload_hash = sha256(&[payload]);
        let required = Self::required_zero_bits(difficulty);
        let mut counter = 0u64;
        while Self::count_leading_zero_bits(&Self::hash(&payload_hash, challenge, counter))
            < required
        {
            counter = counter.wrapping_add(1);
        }
        ProofOfWork {
            payload_hash,
            challenge: *challenge,
            counter,
            difficulty,
        }
    }

    fn verify(&self, proof_of_work: &ProofOfWork) -> bool {
        let hash = Self::hash(
            &proof_of_work.payload_hash,
            &proof_of_work.challenge,
            proof_of_work.counter,
        );
        Self::count_leading_zero_bits(&hash) >= Self::required_zero_bits(proof_of_work.difficulty)
    }
}
