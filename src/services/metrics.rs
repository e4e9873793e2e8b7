use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for observability
pub struct Metrics {
    /// Hunts completed (any outcome)
    pub hunts_run: AtomicU64,
    /// Agent calls dispatched
    pub agent_calls: AtomicU64,
    /// Agent calls that settled as failures
    pub agent_failures: AtomicU64,
    /// Calls short-circuited by an open circuit
    pub short_circuits: AtomicU64,
    /// Payment challenges settled
    pub payments: AtomicU64,
    /// Ground-truth settlements completed
    pub settlements_processed: AtomicU64,
}

/// Point-in-time counter values for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub hunts_run: u64,
    pub agent_calls: u64,
    pub agent_failures: u64,
    pub short_circuits: u64,
    pub payments: u64,
    pub settlements_processed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            hunts_run: AtomicU64::new(0),
            agent_calls: AtomicU64::new(0),
            agent_failures: AtomicU64::new(0),
            short_circuits: AtomicU64::new(0),
            payments: AtomicU64::new(0),
            settlements_processed: AtomicU64::new(0),
        }
    }

    pub fn inc_hunts(&self) {
        self.hunts_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_agent_calls(&self) {
        self.agent_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_agent_failures(&self) {
        self.agent_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_short_circuits(&self) {
        self.short_circuits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_payments(&self) {
        self.payments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_settlements(&self, n: u64) {
        self.settlements_processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, cache_hits: u64, cache_misses: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            hunts_run: self.hunts_run.load(Ordering::Relaxed),
            agent_calls: self.agent_calls.load(Ordering::Relaxed),
            agent_failures: self.agent_failures.load(Ordering::Relaxed),
            short_circuits: self.short_circuits.load(Ordering::Relaxed),
            payments: self.payments.load(Ordering::Relaxed),
            settlements_processed: self.settlements_processed.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
        }
    }

    /// Formatted status block for log output
    pub fn summary(&self, cache_hits: u64, cache_misses: u64) -> String {
        let snap = self.snapshot(cache_hits, cache_misses);
        format!(
            r#"
=== QUARRY COORDINATOR STATUS ===
Hunts: {} | Agent Calls: {}/{} failed
Short Circuits: {} | Payments: {}
Settlements: {} | Cache: {} hits / {} misses
=================================
"#,
            snap.hunts_run,
            snap.agent_failures,
            snap.agent_calls,
            snap.short_circuits,
            snap.payments,
            snap.settlements_processed,
            snap.cache_hits,
            snap.cache_misses,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
