//! Issues and verifies authorization tokens.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

use super::pow::{sha256, ProofOfWorkService};
use crate::domain::network_load::bounded;
use crate::domain::{Address, AuthorizationToken, ConnectionError, NetworkLoad, NetworkMessage};

/// Difficulty parameters.
///
/// Expected difficulty for a message is
/// `target * cost_factor * load * adjustment_factor`, with cost factor and
/// load each floored at `0.01`, then clamped to `[min, max]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    pub target_difficulty: f64,
    pub min_difficulty: f64,
    pub max_difficulty: f64,
    /// Relative slack accepted below the expected difficulty, in `[0, 1)`.
    pub tolerance: f64,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            target_difficulty: 65_536.0,
            min_difficulty: 128.0,
            max_difficulty: 1_048_576.0,
            tolerance: 0.1,
        }
    }
}

impl AuthorizationConfig {
    /// Cheap difficulties for tests.
    pub fn for_testing() -> Self {
        Self {
            target_difficulty: 1024.0,
            min_difficulty: 16.0,
            max_difficulty: 4096.0,
            tolerance: 0.1,
        }
    }
}

/// Binds proofs of work to `(message, load, receiver, counter)`.
///
/// The proof-of-work implementation is injected; there is no global
/// service.
pub struct AuthorizationService {
    proof_of_work_service: Arc<dyn ProofOfWorkService>,
    config: AuthorizationConfig,
}

impl AuthorizationService {
    pub fn new(
        proof_of_work_service: Arc<dyn ProofOfWorkService>,
        config: AuthorizationConfig,
    ) -> Self {
        Self {
            proof_of_work_service,
            config,
        }
    }

    pub fn config(&self) -> &AuthorizationConfig {
        &self.config
    }

    /// Mint a token at the difficulty `network_load` demands for `message`.
    pub fn create_token(
        &self,
        message: &NetworkMessage,
        network_load: &NetworkLoad,
        receiver_address: &Address,
        message_counter: u32,
    ) -> Result<AuthorizationToken, ConnectionError> {
        let difficulty = self.calculate_difficulty(message, network_load);
        self.mint_token(message, receiver_address, message_counter, difficulty)
    }

    /// Mint a token at an explicit difficulty.
    pub fn mint_token(
        &self,
        message: &NetworkMessage,
        receiver_address: &Address,
        message_counter: u32,
        difficulty: f64,
    ) -> Result<AuthorizationToken, ConnectionError> {
        let payload = message.to_bytes()?;
        let challenge = Self::challenge(receiver_address, message_counter);
        let proof_of_work = self
            .proof_of_work_service
            .mint(&payload, &challenge, difficulty);
        trace!(
            kind = message.kind(),
            receiver = %receiver_address,
            difficulty,
            counter = proof_of_work.counter,
            "Minted authorization token"
        );
        Ok(AuthorizationToken::new(proof_of_work, message_counter))
    }

    /// Check `token` against the message, the load the receiver advertised
    /// and the receiver's own address. Pure; never errors.
    pub fn verify(
        &self,
        message: &NetworkMessage,
        token: &AuthorizationToken,
        claimed_load: &NetworkLoad,
        receiver_address: &Address,
    ) -> bool {
        self.verify_with_loads(
            message,
            token,
            std::slice::from_ref(claimed_load),
            receiver_address,
        )
    }

    /// Like [`verify`](Self::verify), accepting a token minted against any
    /// of `loads`.
    pub fn verify_with_loads(
        &self,
        message: &NetworkMessage,
        token: &AuthorizationToken,
        loads: &[NetworkLoad],
        receiver_address: &Address,
    ) -> bool {
        let proof_of_work = &token.proof_of_work;

        let payload = match message.to_bytes() {
            Ok(payload) => payload,
            Err(_) => return false,
        };
        if proof_of_work.payload_hash != sha256(&[payload.as_slice()]) {
            debug!(kind = message.kind(), "Token payload does not match message");
            return false;
        }

        if proof_of_work.challenge != Self::challenge(receiver_address, token.message_counter) {
            debug!(
                kind = message.kind(),
                receiver = %receiver_address,
                "Token challenge does not match receiver"
            );
            return false;
        }

        let slack = 1.0 - bounded(0.0, 0.99, self.config.tolerance);
        let difficulty_ok = loads.iter().any(|load| {
            proof_of_work.difficulty >= self.calculate_difficulty(message, load) * slack
        });
        if !difficulty_ok {
            debug!(
                kind = message.kind(),
                difficulty = proof_of_work.difficulty,
                "Token difficulty below expectation"
            );
            return false;
        }

        self.proof_of_work_service.verify(proof_of_work)
    }

    /// Expected difficulty for `message` under `load`.
    pub fn calculate_difficulty(&self, message: &NetworkMessage, load: &NetworkLoad) -> f64 {
        let cost_factor = bounded(0.01, 1.0, message.cost_factor());
        let load_factor = bounded(0.01, 1.0, load.load());
        let difficulty = self.config.target_difficulty
            * cost_factor
            * load_factor
            * load.difficulty_adjustment_factor();
        bounded(
            self.config.min_difficulty,
            self.config.max_difficulty,
            difficulty,
        )
    }

    /// `SHA256(receiver address || counter)`.
    fn challenge(receiver_address: &Address, message_counter: u32) -> [u8; 32] {
        sha256(&[
            receiver_address.to_string().as_bytes(),
            &message_counter.to_be_bytes(),
        ])
    }
}

impl std::fmt::Debug for AuthorizationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
