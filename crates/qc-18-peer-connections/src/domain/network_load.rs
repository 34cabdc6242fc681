//! Network load: the receiver-reported pressure signal that scales the
//! proof-of-work difficulty demanded of senders.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Upper bound for [`NetworkLoad::difficulty_adjustment_factor`].
pub const MAX_DIFFICULTY_ADJUSTMENT: f64 = 160.0;

/// Load metric in `[0, 1]` plus an operator-controlled difficulty factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkLoad {
    load: f64,
    difficulty_adjustment_factor: f64,
}

impl NetworkLoad {
    /// Load assumed before any measurement exists.
    pub const INITIAL: NetworkLoad = NetworkLoad {
        load: 0.0,
        difficulty_adjustment_factor: 1.0,
    };

    /// Both inputs are clamped into their valid ranges. NaN becomes the
    /// lower bound.
    pub fn new(load: f64, difficulty_adjustment_factor: f64) -> Self {
        Self {
            load: bounded(0.0, 1.0, load),
            difficulty_adjustment_factor: bounded(
                0.0,
                MAX_DIFFICULTY_ADJUSTMENT,
                difficulty_adjustment_factor,
            ),
        }
    }

    pub fn load(&self) -> f64 {
        self.load
    }

    pub fn difficulty_adjustment_factor(&self) -> f64 {
        self.difficulty_adjustment_factor
    }
}

impl Default for NetworkLoad {
    fn default() -> Self {
        Self::INITIAL
    }
}

pub(crate) fn bounded(min: f64, max: f64, value: f64) -> f64 {
    if value.is_nan() {
        return min;
    }
    value.max(min).min(max)
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Current and previous load of this node, shared between the load
/// service (writer) and every connection verifying inbound tokens (readers).
///
/// The previous value is kept because a peer may still mint against the
/// load it learned before the last update.
#[derive(Debug, Default)]
pub struct NetworkLoadSnapshot {
    inner: RwLock<SnapshotState>,
}

#[derive(Debug, Default, Clone, Copy)]
struct SnapshotState {
    current: NetworkLoad,
    previous: Option<NetworkLoad>,
}

impl NetworkLoadSnapshot {
    pub fn new(initial: NetworkLoad) -> Self {
        Self {
            inner: RwLock::new(SnapshotState {
                current: initial,
                previous: None,
            }),
        }
    }

    pub fn current(&self) -> NetworkLoad {
        self.inner.read().current
    }

    pub fn previous(&self) -> Option<NetworkLoad> {
        self.inner.read().previous
    }

    /// Replace the current load, demoting it to `previous`.
    pub fn update(&self, load: NetworkLoad) {
        let mut state = self.inner.write();
        state.previous = Some(state.current);
        state.current = load;
    }
}

// =============================================================================
// CONNECTION METRICS
// =============================================================================

/// Per-connection traffic counters. Updated lock-free from the connection
/// task, read by the load service.
#[derive(Debug)]
pub struct ConnectionMetrics {
    created_at: Instant,
    sent_bytes: AtomicU64,
    sent_messages: AtomicU64,
    received_bytes: AtomicU64,
    received_messages: AtomicU64,
}

/// Point-in-time copy of [`ConnectionMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionMetricsSnapshot {
    pub sent_bytes: u64,
    pub sent_messages: u64,
    pub received_bytes: u64,
    pub received_messages: u64,
    pub age_secs: u64,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self {
            created_at: Instant::now(),
            sent_bytes: AtomicU64::new(0),
            sent_messages: AtomicU64::new(0),
            received_bytes: AtomicU64::new(0),
            received_messages: AtomicU64::new(0),
        }
    }

    pub fn on_sent(&self, bytes: usize) {
        self.sent_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.sent_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_received(&self, bytes: usize) {
        self.received_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.received_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionMetricsSnapshot {
        ConnectionMetricsSnapshot {
            sent_bytes: self.sent_bytes.load(Ordering::Relaxed),
            sent_messages: self.sent_messages.load(Ordering::Relaxed),
            received_bytes: self.received_bytes.load(Ordering::Relaxed),
            received_messages: self.received_messages.load(Ordering::Relaxed),
            age_secs: self.created_at.elapsed().as_secs(),
        }
    }
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// LOAD CALCULATION
// =============================================================================

const MAX_NUM_CONNECTIONS: f64 = 30.0;
const MAX_SENT_BYTES: f64 = 20.0 * 1024.0 * 1024.0;
const MAX_RECEIVED_BYTES: f64 = 20.0 * 1024.0 * 1024.0;
const MAX_SENT_MESSAGES: f64 = 2000.0;
const MAX_RECEIVED_MESSAGES: f64 = 1000.0;

const NUM_CONNECTIONS_WEIGHT: f64 = 0.1;
const SENT_BYTES_WEIGHT: f64 = 0.1;
const RECEIVED_BYTES_WEIGHT: f64 = 0.1;
const SENT_MESSAGES_WEIGHT: f64 = 0.1;
const RECEIVED_MESSAGES_WEIGHT: f64 = 0.1;

/// Ceiling applied to the calculated load.
pub const MAX_CALCULATED_LOAD: f64 = 0.1;

/// Weighted load over all connections, bounded to `[0, MAX_CALCULATED_LOAD]`.
pub fn calculate_load(metrics: &[ConnectionMetricsSnapshot]) -> f64 {
    let num_connections = metrics.len() as f64;
    let sent_bytes: u64 = metrics.iter().map(|m| m.sent_bytes).sum();
    let received_bytes: u64 = metrics.iter().map(|m| m.received_bytes).sum();
    let sent_messages: u64 = metrics.iter().map(|m| m.sent_messages).sum();
    let received_messages: u64 = metrics.iter().map(|m| m.received_messages).sum();

    let load = num_connections / MAX_NUM_CONNECTIONS * NUM_CONNECTIONS_WEIGHT
        + sent_bytes as f64 / MAX_SENT_BYTES * SENT_BYTES_WEIGHT
        + received_bytes as f64 / MAX_RECEIVED_BYTES * RECEIVED_BYTES_WEIGHT
        + sent_messages as f64 / MAX_SENT_MESSAGES * SENT_MESSAGES_WEIGHT
        + received_messages as f64 / MAX_RECEIVED_MESSAGES * RECEIVED_MESSAGES_WEIGHT;

    bounded(0.0, MAX_CALCULATED_LOAD, load)
}
