//! Per-connection task: owns the socket, multiplexes reads, writes and
//! commands.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::handle::{Command, Connection, ConnectionSetup};
use crate::authorization::MessageCounterGuard;
use crate::codec::NetworkEnvelopeChannel;
use crate::domain::{CloseReason, NetworkEnvelope, NetworkMessage};
use crate::ports::{ByteChannel, ConnectionHandler};

/// How long a closing connection keeps flushing queued output.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Register a freshly handshaken connection with `handler` and start its
/// task.
///
/// `backlog` holds envelopes that arrived in the same reads as the
/// handshake; they are processed before anything else.
pub(crate) fn start<C: ByteChannel + 'static>(
    setup: ConnectionSetup,
    channel: NetworkEnvelopeChannel<C>,
    handler: Arc<dyn ConnectionHandler>,
    backlog: Vec<(NetworkEnvelope, usize)>,
) -> (Connection, JoinHandle<()>) {
    let (connection, commands) = Connection::new(setup);
    handler.handle_new_connection(&connection);

    let task = ConnectionTask {
        connection: connection.clone(),
        channel,
        commands,
        handler,
        counter_guard: MessageCounterGuard::new(),
    };
    let join = tokio::spawn(task.run(backlog));
    (connection, join)
}

enum Event {
    Readable(std::io::Result<()>),
    Writable(std::io::Result<()>),
    Command(Option<Command>),
}

struct ConnectionTask<C> {
    connection: Connection,
    channel: NetworkEnvelopeChannel<C>,
    commands: mpsc::UnboundedReceiver<Command>,
    handler: Arc<dyn ConnectionHandler>,
    counter_guard: MessageCounterGuard,
}

impl<C: ByteChannel> ConnectionTask<C> {
    async fn run(mut self, backlog: Vec<(NetworkEnvelope, usize)>) {
        let reason = match self.deliver(backlog) {
            Some(reason) => reason,
            None => self.event_loop().await,
        };
        self.finish(reason).await;
    }

    async fn event_loop(&mut self) -> CloseReason {
        loop {
            let event = {
                let wants_write = self.channel.has_pending_output();
                let byte_channel = self.channel.channel();
                tokio::select! {
                    ready = byte_channel.readable() => Event::Readable(ready),
                    ready = byte_channel.writable(), if wants_write => Event::Writable(ready),
                    command = self.commands.recv() => Event::Command(command),
                }
            };

            let outcome = match event {
                Event::Readable(Ok(())) => self.on_readable(),
                Event::Writable(Ok(())) => self.flush(),
                Event::Readable(Err(e)) | Event::Writable(Err(e)) => {
                    Some(CloseReason::Exception(e.to_string()))
                }
                Event::Command(Some(Command::Send(envelope))) => self.on_send(envelope),
                Event::Command(Some(Command::Shutdown(reason))) => Some(reason),
                Event::Command(None) => Some(CloseReason::LocalInitiated),
            };
            if let Some(reason) = outcome {
                return reason;
            }
        }
    }

    fn on_readable(&mut self) -> Option<CloseReason> {
        match self.channel.receive_sized() {
            Ok(envelopes) => {
                if let Some(reason) = self.deliver(envelopes) {
                    return Some(reason);
                }
                if self.channel.is_open() {
                    None
                } else {
                    Some(CloseReason::PeerClosed)
                }
            }
            Err(e) => {
                warn!(connection = %self.connection.id(), error = %e, "Dropping connection on bad frame");
                Some(CloseReason::Exception(e.to_string()))
            }
        }
    }

    fn on_send(&mut self, envelope: NetworkEnvelope) -> Option<CloseReason> {
        match self.channel.send_envelope(&envelope) {
            Ok(size) => {
                self.connection.record_sent(size);
                trace!(
                    connection = %self.connection.id(),
                    kind = envelope.message.kind(),
                    size,
                    "Queued envelope"
                );
                self.flush()
            }
            // Only this envelope is lost; the stream is still aligned.
            Err(e) => {
                warn!(connection = %self.connection.id(), error = %e, "Envelope not sent");
                None
            }
        }
    }

    fn flush(&mut self) -> Option<CloseReason> {
        match self.channel.flush() {
            Ok(_) => None,
            Err(e) => Some(CloseReason::from(e)),
        }
    }

    /// Validate and dispatch envelopes in arrival order. Stops at the first
    /// envelope that ends the connection.
    fn deliver(&mut self, envelopes: Vec<(NetworkEnvelope, usize)>) -> Option<CloseReason> {
        for (envelope, size) in envelopes {
            self.connection.record_received(size);
            if let Some(reason) = self.on_envelope(envelope) {
                return Some(reason);
            }
        }
        None
    }

    fn on_envelope(&mut self, envelope: NetworkEnvelope) -> Option<CloseReason> {
        let id = self.connection.id();

        if let Err(e) = envelope.verify_version() {
            warn!(connection = %id, error = %e, "Dropping connection");
            return Some(CloseReason::from(e));
        }

        if envelope.message.is_handshake() {
            warn!(
                connection = %id,
                kind = envelope.message.kind(),
                "Ignoring handshake message on established connection"
            );
            return None;
        }

        if let Err(e) = self
            .counter_guard
            .check(envelope.authorization_token.message_counter)
        {
            warn!(connection = %id, error = %e, "Dropping connection");
            return Some(CloseReason::Unauthorized);
        }

        if !self.handler.is_message_authorized(&envelope, &self.connection) {
            warn!(
                connection = %id,
                kind = envelope.message.kind(),
                "Unauthorized message, dropping connection"
            );
            return Some(CloseReason::Unauthorized);
        }

        match envelope.message {
            NetworkMessage::CloseConnection { reason } => {
                debug!(connection = %id, peer_reason = %reason, "Peer closed connection");
                Some(CloseReason::CloseMessageReceived)
            }
            message => {
                self.handler.handle_network_message(message, &self.connection);
                None
            }
        }
    }

    async fn finish(mut self, reason: CloseReason) {
        if self.channel.is_open() && self.channel.has_pending_output() {
            let flushed = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, self.channel.flush_all()).await;
            if !matches!(flushed, Ok(Ok(()))) {
                debug!(connection = %self.connection.id(), "Pending output discarded on close");
            }
        }
        self.channel.close();
        self.commands.close();

        if self.connection.mark_closed() {
            debug!(
                connection = %self.connection.id(),
                peer = %self.connection.peer_address(),
                reason = %reason,
                "Connection closed"
            );
            self.handler
                .handle_connection_closed(&self.connection, reason);
        }
    }
}
