//! # Driving Ports (Inbound API)
//!
//! Callbacks this crate invokes on its owners: the connection handler
//! (implemented by [`Node`](crate::node::Node)) and node listeners
//! (implemented by upper layers).

use crate::connection::Connection;
use crate::domain::{CloseReason, NetworkEnvelope, NetworkId, NetworkMessage};
use crate::node::NodeState;

/// Owner of established connections.
///
/// Managers hand every freshly established connection to
/// [`handle_new_connection`](Self::handle_new_connection) before its read
/// loop starts, so no message can arrive for an unknown connection.
/// All methods run on the connection's task and must not block.
pub trait ConnectionHandler: Send + Sync {
    fn handle_new_connection(&self, connection: &Connection);

    /// Authorization check for a post-handshake envelope. The counter has
    /// already passed the replay guard.
    fn is_message_authorized(&self, envelope: &NetworkEnvelope, connection: &Connection) -> bool;

    fn handle_network_message(&self, message: NetworkMessage, connection: &Connection);

    fn handle_connection_closed(&self, connection: &Connection, reason: CloseReason);

    /// Whether freshly handshaken sockets may still become connections.
    /// Checked right before promotion; `false` drops the socket with
    /// [`ConnectionError::NotRunning`](crate::domain::ConnectionError::NotRunning).
    fn is_accepting(&self) -> bool {
        true
    }
}

/// Node event subscriber.
///
/// Callbacks run on connection tasks; hand heavy work off to a channel.
pub trait NodeListener: Send + Sync {
    fn on_message(&self, message: &NetworkMessage, connection: &Connection, network_id: &NetworkId);

    fn on_connection(&self, connection: &Connection);

    fn on_disconnect(&self, connection: &Connection, close_reason: &CloseReason);

    fn on_state_change(&self, _state: NodeState) {}

    fn on_shutdown(&self) {}
}
