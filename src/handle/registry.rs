// SPDX-License-Identifier: GPL-3.0-only
//! Process-wide registry of live handles
//!
//! Every handle handed out is recorded here by address until its cleanup
//! runs. An address missing from the registry is never dereferenced, so
//! forged, freed and double-freed handles are rejected without touching
//! memory.
//!
//! # Thread Safety
//!
//! One mutex guards the whole set. Operations on a handle run while the
//! registry is locked, which serializes all handle operations in the
//! process and keeps cleanup from freeing an object another thread is
//! still using.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;

static LIVE_HANDLES: Lazy<Mutex<HashSet<usize>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Locked view of the live handle set
pub(super) struct Registry {
    live: MutexGuard<'static, HashSet<usize>>,
}

impl Registry {
    pub(super) fn lock() -> Self {
        Self {
            live: LIVE_HANDLES
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
    }

    pub(super) fn insert(&mut self, address: usize) {
        self.live.insert(address);
        trace!(address, live = self.live.len(), "handle registered");
    }

    pub(super) fn contains(&self, address: usize) -> bool {
        self.live.contains(&address)
    }

    /// Forget `address`. Returns whether it was live.
    pub(super) fn remove(&mut self, address: usize) -> bool {
        let removed = self.live.remove(&address);
        if removed {
            trace!(address, live = self.live.len(), "handle unregistered");
        }
        removed
    }
}

/// Number of handles currently alive in the process
pub fn live_count() -> usize {
    Registry::lock().live.len()
}
