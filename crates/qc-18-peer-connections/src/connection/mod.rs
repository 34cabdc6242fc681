//! # Established Connections
//!
//! After a successful handshake the socket moves into a connection task
//! that owns it exclusively. The task waits on socket readiness and on a
//! command queue; everybody else talks to it through a cloneable
//! [`Connection`] handle.
//!
//! Every inbound envelope is checked in this order:
//!
//! 1. protocol version
//! 2. handshake messages are dropped with a warning
//! 3. message counter strictly increasing
//! 4. [`ConnectionHandler::is_message_authorized`](crate::ports::ConnectionHandler::is_message_authorized)
//!
//! A `CloseConnection` message ends the task with
//! [`CloseReason::CloseMessageReceived`](crate::domain::CloseReason::CloseMessageReceived);
//! any other message goes to the handler.

pub mod context;
pub mod handle;
pub(crate) mod task;

pub use context::ConnectionContext;
pub use handle::{Connection, ConnectionDirection, ConnectionId, FIRST_MESSAGE_COUNTER};
pub(crate) use handle::ConnectionSetup;
