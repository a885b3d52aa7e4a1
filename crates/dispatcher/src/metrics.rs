//! Dispatch metrics for observability

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every worker and the error watcher of one start
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Handler invocations that returned Ok
    handled: AtomicU64,
    /// Handler invocations that returned an error
    failed: AtomicU64,
    /// Handler invocations that panicked
    panicked: AtomicU64,
    /// Records drained by the error watcher
    consume_errors: AtomicU64,
    /// Subset of consume_errors with no message reference
    transport_errors: AtomicU64,
}

impl DispatchMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    pub fn inc_handled(&self) {
        self.handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    pub fn inc_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn consume_errors(&self) -> u64 {
        self.consume_errors.load(Ordering::Relaxed)
    }

    pub fn transport_errors(&self) -> u64 {
        self.transport_errors.load(Ordering::Relaxed)
    }

    /// Count one drained ConsumeError
    pub fn inc_consume_errors(&self, transport: bool) {
        self.consume_errors.fetch_add(1, Ordering::Relaxed);
        if transport {
            self.transport_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            handled: self.handled(),
            failed: self.failed(),
            panicked: self.panicked(),
            consume_errors: self.consume_errors(),
            transport_errors: self.transport_errors(),
        }
    }
}

/// Snapshot of dispatch metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub handled: u64,
    pub failed: u64,
    pub panicked: u64,
    pub consume_errors: u64,
    pub transport_errors: u64,
}

impl DispatchSnapshot {
    /// Total handler invocations observed
    pub fn invocations(&self) -> u64 {
        self.handled + self.failed + self.panicked
    }
}
