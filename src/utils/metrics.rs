//! Observability and Metrics
//!
//! Counters for packet traffic, handshakes, connection lifecycle and deferred
//! tasks. An endpoint owns one `Arc<Metrics>`; a task queue may share it.
//!
//! Uses atomic counters so snapshots can be taken from another thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Session-layer metrics collector
#[derive(Debug)]
pub struct Metrics {
    /// Packets handed to the transport
    pub packets_sent: AtomicU64,
    /// Packets delivered by the transport
    pub packets_received: AtomicU64,
    /// Echoes and stale packets dropped without effect
    pub packets_dropped: AtomicU64,
    /// Packets that failed to parse
    pub packets_malformed: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    /// SYNs sent by `open`
    pub handshakes_started: AtomicU64,
    /// Promotions to established
    pub handshakes_completed: AtomicU64,
    /// Established connections replaced by a newer handshake
    pub connections_superseded: AtomicU64,
    pub connections_closed: AtomicU64,
    /// Connections pruned by roster cleanup
    pub connections_cleaned: AtomicU64,
    /// Duplicate SYN/ACK and unknown opcodes
    pub anomalies: AtomicU64,
    /// Sends rejected by the size ceiling
    pub oversized_sends: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub tasks_expired: AtomicU64,
    pub tasks_failed: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            packets_malformed: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            handshakes_started: AtomicU64::new(0),
            handshakes_completed: AtomicU64::new(0),
            connections_superseded: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            connections_cleaned: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            oversized_sends: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_expired: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a packet handed to the transport
    pub fn packet_sent(&self, byte_count: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    /// Record a packet delivered by the transport
    pub fn packet_received(&self, byte_count: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn packet_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_malformed(&self) {
        self.packets_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_started(&self) {
        self.handshakes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_completed(&self) {
        self.handshakes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_superseded(&self) {
        self.connections_superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_cleaned(&self) {
        self.connections_cleaned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn oversized_send(&self) {
        self.oversized_sends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_expired(&self) {
        self.tasks_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            packets_malformed: self.packets_malformed.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            handshakes_started: self.handshakes_started.load(Ordering::Relaxed),
            handshakes_completed: self.handshakes_completed.load(Ordering::Relaxed),
            connections_superseded: self.connections_superseded.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            connections_cleaned: self.connections_cleaned.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            oversized_sends: self.oversized_sends.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_expired: self.tasks_expired.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            packets_sent = snapshot.packets_sent,
            packets_received = snapshot.packets_received,
            packets_dropped = snapshot.packets_dropped,
            packets_malformed = snapshot.packets_malformed,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            handshakes_started = snapshot.handshakes_started,
            handshakes_completed = snapshot.handshakes_completed,
            connections_superseded = snapshot.connections_superseded,
            connections_closed = snapshot.connections_closed,
            connections_cleaned = snapshot.connections_cleaned,
            anomalies = snapshot.anomalies,
            oversized_sends = snapshot.oversized_sends,
            tasks_completed = snapshot.tasks_completed,
            tasks_expired = snapshot.tasks_expired,
            tasks_failed = snapshot.tasks_failed,
            uptime_seconds = snapshot.uptime_seconds,
            "Session metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub packets_malformed: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub handshakes_started: u64,
    pub handshakes_completed: u64,
    pub connections_superseded: u64,
    pub connections_closed: u64,
    pub connections_cleaned: u64,
    pub anomalies: u64,
    pub oversized_sends: u64,
    pub tasks_completed: u64,
    pub tasks_expired: u64,
    pub tasks_failed: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.packet_sent(100);
        metrics.packet_sent(20);
        metrics.packet_received(7);
        metrics.anomaly();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.packets_sent, 2);
        assert_eq!(snapshot.bytes_sent, 120);
        assert_eq!(snapshot.bytes_received, 7);
        assert_eq!(snapshot.anomalies, 1);
        assert_eq!(snapshot.tasks_failed, 0);
    }
}
