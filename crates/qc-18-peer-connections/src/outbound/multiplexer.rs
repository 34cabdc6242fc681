//! Deduplicates concurrent connection requests per address.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use super::manager::OutboundConnectionManager;
use crate::connection::Connection;
use crate::domain::{Address, Capability, ConnectionError};

pub(super) type ConnectResult = Result<Connection, ConnectionError>;

pub(super) struct PendingAttempt {
    attempt: u64,
    waiters: Vec<(u64, oneshot::Sender<ConnectResult>)>,
    abort: AbortHandle,
}

pub(super) type PendingMap = Arc<Mutex<HashMap<Address, PendingAttempt>>>;

/// Hand `result` to the waiters of `attempt`, unless a newer attempt for
/// `address` has taken its place. Returns whether anyone was settled.
pub(super) fn settle(
    pending: &PendingMap,
    address: &Address,
    attempt: u64,
    result: &ConnectResult,
) -> bool {
    let finished = {
        let mut pending = pending.lock();
        match pending.get(address) {
            Some(entry) if entry.attempt == attempt => pending.remove(address),
            _ => None,
        }
    };
    match finished {
        Some(entry) => {
            for (_, waiter) in entry.waiters {
                let _ = waiter.send(result.clone());
            }
            true
        }
        None => false,
    }
}

/// Front door for outbound connections.
///
/// At most one attempt per address is in flight; every caller asking for
/// that address while it runs receives a [`PendingConnection`] resolving
/// to the same outcome. Attempts wait until the node signals that its own
/// listener is up, since the peer will want to dial back.
pub struct OutboundConnectionMultiplexer {
    manager: Arc<OutboundConnectionManager>,
    runtime: Handle,
    pending: PendingMap,
    server_ready: watch::Sender<bool>,
    next_waiter: AtomicU64,
    next_attempt: AtomicU64,
    closed: AtomicBool,
}

impl OutboundConnectionMultiplexer {
    pub fn new(manager: Arc<OutboundConnectionManager>, runtime: Handle) -> Self {
        let (server_ready, _) = watch::channel(false);
        Self {
            manager,
            runtime,
            pending: Arc::new(Mutex::new(HashMap::new())),
            server_ready,
            next_waiter: AtomicU64::new(0),
            next_attempt: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn manager(&self) -> &Arc<OutboundConnectionManager> {
        &self.manager
    }

    /// Release attempts held back until the listener is bound.
    pub fn signal_server_ready(&self) {
        self.server_ready.send_replace(true);
    }

    pub fn is_server_ready(&self) -> bool {
        *self.server_ready.borrow()
    }

    /// Connection to `capability`: the open one, the attempt already in
    /// flight, or a new attempt.
    ///
    /// Dropping the returned future withdraws this caller; the attempt is
    /// aborted once nobody waits for it.
    pub fn get_connection(&self, capability: &Capability) -> PendingConnection {
        let address = capability.address().clone();
        let waiter = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let pending_connection = PendingConnection {
            address: address.clone(),
            waiter,
            receiver,
            pending: Arc::clone(&self.pending),
            done: false,
        };

        if let Some(existing) = self.manager.get_connection(&address) {
            let _ = sender.send(Ok(existing));
            return pending_connection;
        }

        let mut pending = self.pending.lock();
        if self.closed.load(Ordering::SeqCst) {
            let _ = sender.send(Err(ConnectionError::NotRunning));
            return pending_connection;
        }
        if let Some(attempt) = pending.get_mut(&address) {
            trace!(peer = %address, waiters = attempt.waiters.len() + 1, "Joining pending attempt");
            attempt.waiters.push((waiter, sender));
            return pending_connection;
        }

        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        debug!(peer = %address, attempt, "Starting connection attempt");
        let join = self.runtime.spawn(Self::attempt(
            attempt,
            Arc::clone(&self.manager),
            capability.clone(),
            self.server_ready.subscribe(),
            Arc::clone(&self.pending),
        ));
        pending.insert(
            address,
            PendingAttempt {
                attempt,
                waiters: vec![(waiter, sender)],
                abort: join.abort_handle(),
            },
        );
        pending_connection
    }

    async fn attempt(
        attempt: u64,
        manager: Arc<OutboundConnectionManager>,
        capability: Capability,
        mut server_ready: watch::Receiver<bool>,
        pending: PendingMap,
    ) {
        // The borrow guard must not live across the dial
        let ready = server_ready.wait_for(|ready| *ready).await.map(|_| ());
        let result = match ready {
            Ok(()) => manager.create_new_connection(&capability).await,
            Err(_) => Err(ConnectionError::NotRunning),
        };

        if !settle(&pending, capability.address(), attempt, &result) {
            trace!(peer = %capability.address(), attempt, "Attempt finished after being replaced");
        }
    }

    /// Addresses with an attempt in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    #[cfg(test)]
    pub(super) fn pending(&self) -> &PendingMap {
        &self.pending
    }

    #[cfg(test)]
    pub(super) fn attempt_in_flight(&self, address: &Address) -> Option<u64> {
        self.pending.lock().get(address).map(|entry| entry.attempt)
    }

    /// Abort every attempt. Waiters resolve to
    /// [`ConnectionError::Cancelled`]; later requests to
    /// [`ConnectionError::NotRunning`].
    pub fn shutdown(&self) {
        let attempts: Vec<_> = {
            let mut pending = self.pending.lock();
            self.closed.store(true, Ordering::SeqCst);
            pending.drain().collect()
        };
        for (address, attempt) in attempts {
            debug!(peer = %address, "Aborting connection attempt");
            attempt.abort.abort();
        }
    }
}

impl std::fmt::Debug for OutboundConnectionMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundConnectionMultiplexer")
            .field("pending", &self.pending.lock().len())
            .field("server_ready", &self.is_server_ready())
            .finish()
    }
}

/// Future of one caller's connection request.
pub struct PendingConnection {
    address: Address,
    waiter: u64,
    receiver: oneshot::Receiver<ConnectResult>,
    pending: PendingMap,
    done: bool,
}

impl PendingConnection {
    pub fn address(&self) -> &Address {
        &self.address
    }
}

impl Future for PendingConnection {
    type Output = ConnectResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(result) => {
                self.done = true;
                Poll::Ready(result.unwrap_or(Err(ConnectionError::Cancelled)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingConnection {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.receiver.close();
        let mut pending = self.pending.lock();
        let abandoned = match pending.get_mut(&self.address) {
            Some(attempt) => {
                attempt.waiters.retain(|(id, _)| *id != self.waiter);
                attempt.waiters.is_empty()
            }
            None => false,
        };
        if abandoned {
            if let Some(attempt) = pending.remove(&self.address) {
                debug!(peer = %self.address, "Connection attempt abandoned");
                attempt.abort.abort();
            }
        }
    }
}

impl std::fmt::Debug for PendingConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingConnection")
            .field("address", &self.address)
            .field("waiter", &self.waiter)
            .finish()
    }
}
