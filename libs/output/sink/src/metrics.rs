//! Self-observation counters for an output.
//!
//! Lets the agent observe its own loss rate: every dropped or failed batch is
//! counted here in addition to being reported to the error handlers.
//!
//! ## Counters
//!
//! - **Ingress**: records accepted, records rejected after shutdown
//! - **Flush**: non-empty batches drained
//! - **Delivery**: batches/records delivered, batches failed, timeouts
//! - **Backpressure**: batches/records dropped from the pending queue
//! - **Handlers**: error handler failures

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Atomic counters shared by the ingress, flush and send paths
#[derive(Debug)]
pub struct SinkMetrics {
    sink_name: String,
    start_time: Instant,

    records_accepted: AtomicU64,
    records_rejected: AtomicU64,
    batches_flushed: AtomicU64,
    batches_delivered: AtomicU64,
    records_delivered: AtomicU64,
    batches_failed: AtomicU64,
    records_failed: AtomicU64,
    send_timeouts: AtomicU64,
    batches_dropped: AtomicU64,
    records_dropped: AtomicU64,
    handler_failures: AtomicU64,

    total_send_latency_ns: AtomicU64,
    max_send_latency_ns: AtomicU64,
}

/// Point-in-time copy of [`SinkMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub sink_name: String,
    pub uptime: Duration,
    pub records_accepted: u64,
    pub records_rejected: u64,
    pub batches_flushed: u64,
    pub batches_delivered: u64,
    pub records_delivered: u64,
    pub batches_failed: u64,
    pub records_failed: u64,
    pub send_timeouts: u64,
    pub batches_dropped: u64,
    pub records_dropped: u64,
    pub handler_failures: u64,
    pub average_send_latency_ns: u64,
    pub max_send_latency_ns: u64,
}

impl MetricsSnapshot {
    /// Records that left the sink without being delivered
    pub fn records_lost(&self) -> u64 {
        self.records_failed + self.records_dropped
    }
}

impl SinkMetrics {
    pub fn new(sink_name: impl Into<String>) -> Self {
        Self {
            sink_name: sink_name.into(),
            start_time: Instant::now(),
            records_accepted: AtomicU64::new(0),
            records_rejected: AtomicU64::new(0),
            batches_flushed: AtomicU64::new(0),
            batches_delivered: AtomicU64::new(0),
            records_delivered: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            records_failed: AtomicU64::new(0),
            send_timeouts: AtomicU64::new(0),
            batches_dropped: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            total_send_latency_ns: AtomicU64::new(0),
            max_send_latency_ns: AtomicU64::new(0),
        }
    }

    pub fn sink_name(&self) -> &str {
        &self.sink_name
    }

    pub fn record_accepted(&self) {
        self.records_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self, records: usize, latency: Duration) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.records_delivered
            .fetch_add(records as u64, Ordering::Relaxed);
        self.record_latency(latency);
    }

    /// Records that reached the backend from a batch that still failed
    pub fn record_partial_delivery(&self, records: usize) {
        self.records_delivered
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self, records: usize, timed_out: bool) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.records_failed.fetch_add(records as u64, Ordering::Relaxed);
        if timed_out {
            self.send_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_drop(&self, records: usize) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
        self.records_dropped.fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, latency: Duration) {
        let latency_ns = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.total_send_latency_ns
            .fetch_add(latency_ns, Ordering::Relaxed);

        let mut current_max = self.max_send_latency_ns.load(Ordering::Relaxed);
        while latency_ns > current_max {
            match self.max_send_latency_ns.compare_exchange_weak(
                current_max,
                latency_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_max = actual,
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let batches_delivered = self.batches_delivered.load(Ordering::Relaxed);
        let total_latency = self.total_send_latency_ns.load(Ordering::Relaxed);

        MetricsSnapshot {
            sink_name: self.sink_name.clone(),
            uptime: self.start_time.elapsed(),
            records_accepted: self.records_accepted.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            batches_delivered,
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            send_timeouts: self.send_timeouts.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            average_send_latency_ns: if batches_delivered > 0 {
                total_latency / batches_delivered
            } else {
                0
            },
            max_send_latency_ns: self.max_send_latency_ns.load(Ordering::Relaxed),
        }
    }
}
