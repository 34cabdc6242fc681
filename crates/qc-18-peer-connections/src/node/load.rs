//! Periodic recalculation of this node's advertised load.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::connection::{Connection, ConnectionId};
use crate::domain::{calculate_load, ConnectionMetricsSnapshot, NetworkLoad, NetworkLoadSnapshot};

/// Turns connection traffic into a [`NetworkLoad`].
///
/// Each update measures the traffic since the previous update, so the
/// load reflects recent pressure rather than lifetime totals.
#[derive(Debug)]
pub struct NetworkLoadService {
    snapshot: Arc<NetworkLoadSnapshot>,
    difficulty_adjustment_factor: f64,
    last_seen: Mutex<HashMap<ConnectionId, ConnectionMetricsSnapshot>>,
}

impl NetworkLoadService {
    pub fn new(difficulty_adjustment_factor: f64) -> Self {
        let initial = NetworkLoad::new(
            NetworkLoad::INITIAL.load(),
            difficulty_adjustment_factor,
        );
        Self {
            snapshot: Arc::new(NetworkLoadSnapshot::new(initial)),
            difficulty_adjustment_factor,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn snapshot(&self) -> &Arc<NetworkLoadSnapshot> {
        &self.snapshot
    }

    pub fn current(&self) -> NetworkLoad {
        self.snapshot.current()
    }

    /// Loads a peer may legitimately have minted against: current, then
    /// previous.
    pub fn acceptable_loads(&self) -> Vec<NetworkLoad> {
        let mut loads = vec![self.snapshot.current()];
        loads.extend(self.snapshot.previous());
        loads
    }

    /// Recompute from `connections` and publish.
    pub fn update(&self, connections: &[Connection]) -> NetworkLoad {
        let window: Vec<ConnectionMetricsSnapshot> = {
            let mut last_seen = self.last_seen.lock();
            let window = connections
                .iter()
                .map(|connection| {
                    let now = connection.metrics();
                    let before = last_seen.insert(connection.id(), now).unwrap_or_default();
                    delta(&now, &before)
                })
                .collect();
            last_seen.retain(|id, _| connections.iter().any(|c| c.id() == *id));
            window
        };

        let load = NetworkLoad::new(calculate_load(&window), self.difficulty_adjustment_factor);
        self.snapshot.update(load);
        debug!(
            connections = connections.len(),
            load = load.load(),
            "Network load updated"
        );
        load
    }
}

fn delta(now: &ConnectionMetricsSnapshot, before: &ConnectionMetricsSnapshot) -> ConnectionMetricsSnapshot {
    ConnectionMetricsSnapshot {
        sent_bytes: now.sent_bytes.saturating_sub(before.sent_bytes),
        sent_messages: now.sent_messages.saturating_sub(before.sent_messages),
        received_bytes: now.received_bytes.saturating_sub(before.received_bytes),
        received_messages: now.received_messages.saturating_sub(before.received_messages),
        age_secs: now.age_secs,
    }
}
