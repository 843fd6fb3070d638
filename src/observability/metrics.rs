//! Routing counters
//!
//! Plain atomics, cheap enough to bump on every dispatch.

use std::sync::atomic::{AtomicU64, Ordering};

/// Event count, relaxed ordering
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

/// Counters kept by the router and the emulator
#[derive(Debug, Default)]
pub struct RouterMetrics {
    /// Single-node dispatches, retries included
    pub dispatches: Counter,
    /// Fan-out rounds
    pub fan_outs: Counter,
    /// MOVED and ASK replies received
    pub redirects: Counter,
    /// Dispatches re-issued after a redirect or a topology change
    pub retries: Counter,
    /// Full topology refreshes
    pub refreshes: Counter,
    /// Commands refused because their keys span slots
    pub cross_slot_rejections: Counter,
    /// Multi-key operations run through the emulator
    pub emulated_operations: Counter,
    /// Temporary keys whose cleanup failed
    pub orphaned_keys: Counter,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot as (name, value) pairs
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("dispatches", self.dispatches.get()),
            ("fan_outs", self.fan_outs.get()),
            ("redirects", self.redirects.get()),
            ("retries", self.retries.get()),
            ("refreshes", self.refreshes.get()),
            ("cross_slot_rejections", self.cross_slot_rejections.get()),
            ("emulated_operations", self.emulated_operations.get()),
            ("orphaned_keys", self.orphaned_keys.get()),
        ]
    }

    pub fn reset(&self) {
        self.dispatches.reset();
        self.fan_outs.reset();
        self.redirects.reset();
        self.retries.reset();
        self.refreshes.reset();
        self.cross_slot_rejections.reset();
        self.emulated_operations.reset();
        self.orphaned_keys.reset();
    }
}
