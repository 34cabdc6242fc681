use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::authorization::AuthorizationService;
use crate::codec::EnvelopeConfig;
use crate::domain::{Capability, NetworkLoadSnapshot};
use crate::ports::{BanList, ConnectionHandler};

/// Dependencies shared by the inbound and outbound managers.
///
/// The handler is held weakly: it usually owns the managers, and a
/// connection is dropped if its owner is already gone.
#[derive(Clone)]
pub struct ConnectionContext {
    pub my_capability: Capability,
    pub network_load: Arc<NetworkLoadSnapshot>,
    pub authorization_service: Arc<AuthorizationService>,
    pub ban_list: Arc<dyn BanList>,
    pub handler: Weak<dyn ConnectionHandler>,
    pub envelope_config: EnvelopeConfig,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl ConnectionContext {
    pub(crate) fn handler(&self) -> Option<Arc<dyn ConnectionHandler>> {
        self.handler.upgrade()
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("my_capability", &self.my_capability)
            .field("envelope_config", &self.envelope_config)
            .field("connect_timeout", &self.connect_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}
