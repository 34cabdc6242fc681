//! Responder side of the connection handshake.

use std::sync::Arc;
use tracing::debug;

use crate::authorization::AuthorizationService;
use crate::domain::{
    Capability, ConnectionError, ConnectionHandshakeRequest, ConnectionHandshakeResponse,
    NetworkEnvelope, NetworkLoad, NetworkMessage,
};
use crate::ports::BanList;

use super::HANDSHAKE_MESSAGE_COUNTER;

/// Responder state. Validation runs strictly in this order; any failure
/// lands in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    AwaitInitialEnvelopes,
    ValidateCount,
    ValidateVersion,
    ValidateMessageType,
    ValidateBanList,
    ValidateAuthorization,
    BuildResponse,
    Completed,
    Failed,
}

/// Outcome of a successful handshake on the responder side.
#[derive(Debug, Clone)]
pub struct ResponderResult {
    pub peer_capability: Capability,
    pub peer_network_load: NetworkLoad,
    /// To be written to the socket by the caller.
    pub response_envelope: NetworkEnvelope,
}

/// Validates the initial envelopes of an accepted socket and builds the
/// response.
///
/// Synchronous and single-shot: it works only on envelopes that were
/// already read, performs no I/O, and is not re-entrant. Minting the
/// response token is CPU work, so async callers run it on the blocking
/// pool.
pub struct ConnectionHandshakeResponder {
    ban_list: Arc<dyn BanList>,
    my_capability: Capability,
    my_network_load: NetworkLoad,
    authorization_service: Arc<AuthorizationService>,
    initial_envelopes: Vec<NetworkEnvelope>,
    state: ResponderState,
}

impl ConnectionHandshakeResponder {
    pub fn new(
        ban_list: Arc<dyn BanList>,
        my_capability: Capability,
        my_network_load: NetworkLoad,
        authorization_service: Arc<AuthorizationService>,
        initial_envelopes: Vec<NetworkEnvelope>,
    ) -> Self {
        Self {
            ban_list,
            my_capability,
            my_network_load,
            authorization_service,
            initial_envelopes,
            state: ResponderState::AwaitInitialEnvelopes,
        }
    }

    pub fn state(&self) -> ResponderState {
        self.state
    }

    /// Run the state machine to completion. The initial envelopes are
    /// consumed, so a second call fails with `EmptyInitialEnvelopes`.
    pub fn verify_and_build_respond(&mut self) -> Result<ResponderResult, ConnectionError> {
        let initial_envelopes = std::mem::take(&mut self.initial_envelopes);
        match self.run(initial_envelopes) {
            Ok(result) => {
                self.state = ResponderState::Completed;
                Ok(result)
            }
            Err(e) => {
                debug!(state = ?self.state, error = %e, "Handshake request rejected");
                self.state = ResponderState::Failed;
                Err(e)
            }
        }
    }

    fn run(
        &mut self,
        initial_envelopes: Vec<NetworkEnvelope>,
    ) -> Result<ResponderResult, ConnectionError> {
        self.state = ResponderState::ValidateCount;
        let envelope = match initial_envelopes.as_slice() {
            [] => return Err(ConnectionError::EmptyInitialEnvelopes),
            [envelope] => envelope,
            many => {
                return Err(ConnectionError::MultipleConcurrentRequests { count: many.len() })
            }
        };

        self.state = ResponderState::ValidateVersion;
        envelope.verify_version()?;

        self.state = ResponderState::ValidateMessageType;
        let request = match &envelope.message {
            NetworkMessage::ConnectionHandshakeRequest(request) => request,
            other => {
                return Err(ConnectionError::UnexpectedMessageType {
                    expected: "ConnectionHandshake request",
                    received: other.kind().to_string(),
                })
            }
        };

        self.state = ResponderState::ValidateBanList;
        let peer_address = request.capability.address();
        if self.ban_list.is_banned(peer_address) {
            return Err(ConnectionError::PeerBanned {
                address: peer_address.clone(),
            });
        }

        self.state = ResponderState::ValidateAuthorization;
        if !self.authorization_service.verify(
            &envelope.message,
            &envelope.authorization_token,
            &request.network_load,
            self.my_capability.address(),
        ) {
            return Err(ConnectionError::AuthorizationFailed {
                context: format!("ConnectionHandshake request from {}", peer_address),
            });
        }

        self.state = ResponderState::BuildResponse;
        let ConnectionHandshakeRequest {
            capability: peer_capability,
            network_load: peer_network_load,
        } = request.clone();
        let response = NetworkMessage::ConnectionHandshakeResponse(ConnectionHandshakeResponse {
            capability: self.my_capability.clone(),
            network_load: self.my_network_load,
        });
        // We are now the sender: mint against the initiator's load and address.
        let token = self.authorization_service.create_token(
            &response,
            &peer_network_load,
            peer_capability.address(),
            HANDSHAKE_MESSAGE_COUNTER,
        )?;

        Ok(ResponderResult {
            peer_capability,
            peer_network_load,
            response_envelope: NetworkEnvelope::new(token, response),
        })
    }
}
