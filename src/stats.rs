//! Per-connector statistics (§4.1).
//!
//! Plain atomics rather than a global/static registry: each [`Acceptor`]
//! owns one [`ConnectorStats`] and hands out `Arc` clones to whoever wants
//! to read it. There is no process-wide singleton (see the "no singletons"
//! design note in §9 of the spec).
//!
//! [`Acceptor`]: crate::acceptor::Acceptor

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Aggregate counters for one connector. Writers use `Relaxed`/`AcqRel`
/// orderings since these are independent counters with no cross-field
/// invariant to preserve; readers never block a concurrent accept.
#[derive(Debug, Default)]
pub struct ConnectorStats {
    total_connections: AtomicU64,
    open_connections: AtomicUsize,
    open_connections_high_water: AtomicUsize,
    total_requests: AtomicU64,
    connection_duration_nanos_total: AtomicU64,
    closed_connections: AtomicU64,
}

impl ConnectorStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly accepted connection.
    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        let open = self.open_connections.fetch_add(1, Ordering::AcqRel) + 1;
        self.open_connections_high_water
            .fetch_max(open, Ordering::AcqRel);
    }

    /// Record a connection closing, with its lifetime and the number of
    /// requests it served, feeding the per-connection distributions.
    pub fn connection_closed(&self, duration: Duration, requests_served: u64) {
        self.open_connections.fetch_sub(1, Ordering::AcqRel);
        self.closed_connections.fetch_add(1, Ordering::Relaxed);
        self.connection_duration_nanos_total
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        self.total_requests
            .fetch_add(requests_served, Ordering::Relaxed);
    }

    #[must_use]
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn open_connections_high_water(&self) -> usize {
        self.open_connections_high_water.load(Ordering::Acquire)
    }

    /// Mean connection lifetime across all connections closed so far, or
    /// `None` if none have closed yet.
    #[must_use]
    pub fn mean_connection_duration(&self) -> Option<Duration> {
        let closed = self.closed_connections.load(Ordering::Relaxed);
        if closed == 0 {
            return None;
        }
        let total_nanos = self.connection_duration_nanos_total.load(Ordering::Relaxed);
        Some(Duration::from_nanos(total_nanos / closed))
    }

    /// Mean requests-per-connection across all connections closed so far.
    #[must_use]
    pub fn mean_requests_per_connection(&self) -> Option<f64> {
        let closed = self.closed_connections.load(Ordering::Relaxed);
        if closed == 0 {
            return None;
        }
        let total = self.total_requests.load(Ordering::Relaxed);
        Some(total as f64 / closed as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_high_water_mark_across_overlapping_connections() {
        let stats = ConnectorStats::new();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_opened();
        assert_eq!(stats.open_connections(), 3);
        assert_eq!(stats.open_connections_high_water(), 3);

        stats.connection_closed(Duration::from_millis(10), 2);
        stats.connection_closed(Duration::from_millis(20), 4);
        assert_eq!(stats.open_connections(), 1);
        assert_eq!(stats.open_connections_high_water(), 3);

        assert_eq!(stats.mean_requests_per_connection(), Some(3.0));
        assert_eq!(stats.mean_connection_duration(), Some(Duration::from_millis(15)));
    }

    #[test]
    fn empty_distributions_report_none() {
        let stats = ConnectorStats::new();
        assert_eq!(stats.mean_connection_duration(), None);
        assert_eq!(stats.mean_requests_per_connection(), None);
    }
}
