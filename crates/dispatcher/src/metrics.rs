//! Registry and command counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one subscriber registry
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    failures: AtomicU64,
    removals: AtomicU64,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_broadcasts(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_deliveries(&self, n: u64) {
        self.deliveries.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_removals(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub broadcasts: u64,
    pub deliveries: u64,
    pub failures: u64,
    pub removals: u64,
}

/// Counters for the command dispatcher
#[derive(Debug, Default)]
pub struct CommandMetrics {
    executed: AtomicU64,
    suppressed: AtomicU64,
    failed: AtomicU64,
    resets: AtomicU64,
}

impl CommandMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Completed reset sequences
    pub fn inc_resets(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CommandSnapshot {
        CommandSnapshot {
            executed: self.executed.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandSnapshot {
    pub executed: u64,
    pub suppressed: u64,
    pub failed: u64,
    pub resets: u64,
}
