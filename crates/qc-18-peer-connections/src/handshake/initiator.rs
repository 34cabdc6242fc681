//! Initiator side of the connection handshake.

use std::sync::Arc;

use crate::authorization::AuthorizationService;
use crate::domain::{
    Address, Capability, ConnectionError, ConnectionHandshakeRequest,
    ConnectionHandshakeResponse, NetworkEnvelope, NetworkLoad, NetworkMessage,
};
use crate::ports::BanList;

use super::HANDSHAKE_MESSAGE_COUNTER;

/// Builds the handshake request for an outbound socket and validates the
/// single response, mirroring the responder's checks.
pub struct ConnectionHandshakeInitiator {
    my_capability: Capability,
    my_network_load: NetworkLoad,
    authorization_service: Arc<AuthorizationService>,
    ban_list: Arc<dyn BanList>,
    peer_address: Address,
}

impl ConnectionHandshakeInitiator {
    pub fn new(
        my_capability: Capability,
        my_network_load: NetworkLoad,
        authorization_service: Arc<AuthorizationService>,
        ban_list: Arc<dyn BanList>,
        peer_address: Address,
    ) -> Self {
        Self {
            my_capability,
            my_network_load,
            authorization_service,
            ban_list,
            peer_address,
        }
    }

    pub fn peer_address(&self) -> &Address {
        &self.peer_address
    }

    /// Request envelope, bound to the responder's address and our declared
    /// load. CPU-bound.
    pub fn initiate(&self) -> Result<NetworkEnvelope, ConnectionError> {
        let request = NetworkMessage::ConnectionHandshakeRequest(ConnectionHandshakeRequest {
            capability: self.my_capability.clone(),
            network_load: self.my_network_load,
        });
        let token = self.authorization_service.create_token(
            &request,
            &self.my_network_load,
            &self.peer_address,
            HANDSHAKE_MESSAGE_COUNTER,
        )?;
        Ok(NetworkEnvelope::new(token, request))
    }

    /// Validate the responder's envelope: version, type, ban list, then
    /// authorization against our own load and address.
    pub fn finish(
        &self,
        envelope: &NetworkEnvelope,
    ) -> Result<ConnectionHandshakeResponse, ConnectionError> {
        envelope.verify_version()?;

        let response = match &envelope.message {
            NetworkMessage::ConnectionHandshakeResponse(response) => response,
            other => {
                return Err(ConnectionError::UnexpectedMessageType {
                    expected: "ConnectionHandshake response",
                    received: other.kind().to_string(),
                })
            }
        };

        let responder_address = response.capability.address();
        if self.ban_list.is_banned(responder_address) {
            return Err(ConnectionError::PeerBanned {
                address: responder_address.clone(),
            });
        }

        if !self.authorization_service.verify(
            &envelope.message,
            &envelope.authorization_token,
            &self.my_network_load,
            self.my_capability.address(),
        ) {
            return Err(ConnectionError::AuthorizationFailed {
                context: format!("ConnectionHandshake response from {}", self.peer_address),
            });
        }

        Ok(response.clone())
    }
}
