use parking_lot::RwLock;
use std::collections::HashSet;

use crate::domain::Address;
use crate::ports::BanList;

// ============================================================================
// InMemoryBanList - set-backed ban list
// ============================================================================

/// Ban list held in memory. Peer scoring lives elsewhere; whoever owns it
/// calls [`ban`](Self::ban)/[`unban`](Self::unban), this crate only reads.
#[derive(Debug, Default)]
pub struct InMemoryBanList {
    banned: RwLock<HashSet<Address>>,
}

impl InMemoryBanList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the address was already banned.
    pub fn ban(&self, address: Address) -> bool {
        self.banned.write().insert(address)
    }

    /// Returns `false` if the address was not banned.
    pub fn unban(&self, address: &Address) -> bool {
        self.banned.write().remove(address)
    }

    pub fn count(&self) -> usize {
        self.banned.read().len()
    }
}

impl BanList for InMemoryBanList {
    fn is_banned(&self, address: &Address) -> bool {
        self.banned.read().contains(address)
    }
}

/// Ban list that bans nobody.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpBanList;

impl BanList for NoOpBanList {
    fn is_banned(&self, _address: &Address) -> bool {
        false
    }
}
