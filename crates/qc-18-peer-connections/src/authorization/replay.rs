use crate::domain::ConnectionError;

/// Per-connection replay guard over sender message counters.
///
/// Counter `0` belongs to the handshake, so the first application message
/// must carry at least `1` and every later one must be strictly larger.
#[derive(Debug, Clone, Default)]
pub struct MessageCounterGuard {
    last_received: u32,
}

impl MessageCounterGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `counter` if it advances, remembering it.
    pub fn check(&mut self, counter: u32) -> Result<(), ConnectionError> {
        if counter <= self.last_received {
            return Err(ConnectionError::Replay {
                counter,
                last: self.last_received,
            });
        }
        self.last_received = counter;
        Ok(())
    }

    pub fn last_received(&self) -> u32 {
        self.last_received
    }
}
