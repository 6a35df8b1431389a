//! # Scheduler Metrics
//!
//! Counters kept by the multiplexed adapter.
//!
//! ## Metrics Exported
//!
//! - Transfers registered with the native multiplexer
//! - Transactions completed, failed, intercepted and retried
//! - Current and peak in-flight transfers

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// =============================================================================
// SCHEDULER STATS
// =============================================================================

/// Live scheduler counters
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Transfers handed to the native multiplexer
    pub registered: AtomicU64,
    /// Transactions that resolved through `complete`
    pub completed: AtomicU64,
    /// Transactions left with an attached failure
    pub failed: AtomicU64,
    /// Transactions a listener settled without (or instead of) a transfer
    pub intercepted: AtomicU64,
    /// Retries requested by listeners
    pub retried: AtomicU64,
    /// Transfers currently registered
    pub in_flight: AtomicU64,
    /// Highest value `in_flight` has reached
    pub peak_in_flight: AtomicU64,
}

impl SchedulerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transfer handed to the multiplexer
    pub fn record_registered(&self) {
        self.registered.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::Relaxed);
    }

    /// Record a transfer removed from the multiplexer
    pub fn record_removed(&self) {
        // Saturating: a fatal error can drop handles without removal.
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_intercepted(&self) {
        self.intercepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            registered: self.registered.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            intercepted: self.intercepted.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`SchedulerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub registered: u64,
    pub completed: u64,
    pub failed: u64,
    pub intercepted: u64,
    pub retried: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
}
