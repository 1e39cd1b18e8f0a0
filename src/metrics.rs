//! Lightweight lifecycle counters used for diagnostics.
//!
//! The `ServiceMetrics` type exposes lock-free counters that track:
//! - Documents ingested (cumulative)
//! - Queries executed
//! - Indices offloaded and resumed
//!
//! The snapshot is surfaced via HTTP (`GET /stats`) so dashboards can observe scheduling
//! activity without scraping logs.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing manager activity.
///
/// The struct intentionally stays minimal—just atomic counters—so it can be shared freely and
/// queried without holding locks.
#[derive(Default)]
pub struct ServiceMetrics {
    documents_ingested: AtomicU64,
    queries_executed: AtomicU64,
    indices_offloaded: AtomicU64,
    indices_resumed: AtomicU64,
}

impl ServiceMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted ingest batch.
    pub fn record_ingest(&self, document_count: u64) {
        self.documents_ingested
            .fetch_add(document_count, Ordering::Relaxed);
    }

    /// Record a completed query round-trip.
    pub fn record_query(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an index written to its cold form.
    pub fn record_offload(&self) {
        self.indices_offloaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an index hydrated from disk.
    pub fn record_resume(&self) {
        self.indices_resumed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            indices_offloaded: self.indices_offloaded.load(Ordering::Relaxed),
            indices_resumed: self.indices_resumed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of the lifecycle counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents accepted across all indices since startup.
    pub documents_ingested: u64,
    /// Queries answered since startup.
    pub queries_executed: u64,
    /// Offload operations completed since startup.
    pub indices_offloaded: u64,
    /// Resume operations completed since startup.
    pub indices_resumed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_activity() {
        let metrics = ServiceMetrics::new();
        metrics.record_ingest(2);
        metrics.record_ingest(3);
        metrics.record_query();
        metrics.record_offload();
        metrics.record_resume();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_ingested, 5);
        assert_eq!(snapshot.queries_executed, 1);
        assert_eq!(snapshot.indices_offloaded, 1);
        assert_eq!(snapshot.indices_resumed, 1);
    }

    #[test]
    fn snapshot_starts_empty() {
        let snapshot = ServiceMetrics::new().snapshot();
        assert_eq!(snapshot.documents_ingested, 0);
        assert_eq!(snapshot.queries_executed, 0);
    }
}
