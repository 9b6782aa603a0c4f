//! Backend operation metrics.
//!
//! Tracks failures and latency of calls to the remote KMS, labeled by
//! operation kind, and renders them in the Prometheus text exposition
//! format for the metrics endpoint.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const FAILURES_METRIC: &str = "cloudkms_kms_operation_failures_total";
const LATENCY_METRIC: &str = "cloudkms_kms_client_operation_latency_microseconds";

/// Upper bounds (inclusive) of the latency histogram buckets, in microseconds.
const LATENCY_BUCKETS_MICROS: [u64; 13] = [
    1_000, 2_500, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000, 500_000, 1_000_000, 2_500_000,
    5_000_000, 10_000_000,
];

/// Histogram slots: one per bound plus the +Inf overflow slot.
const LATENCY_SLOTS: usize = LATENCY_BUCKETS_MICROS.len() + 1;

/// Kind of backend operation being measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Encrypt,
    Decrypt,
}

impl Operation {
    pub const ALL: [Operation; 2] = [Operation::Encrypt, Operation::Decrypt];

    /// Label value used in the exposition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Encrypt => 0,
            Self::Decrypt => 1,
        }
    }
}

/// Capability to record backend operation outcomes.
///
/// Passed into the plugin core so it never reaches for global state.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    /// Record one latency observation for `op`.
    fn observe_latency(&self, op: Operation, elapsed: Duration);

    /// Count one failed call of `op`.
    fn inc_failure(&self, op: Operation);
}

/// Process-wide operation metrics.
///
/// Counters only ever increase; all updates are lock-free.
#[derive(Debug, Default)]
pub struct Metrics {
    failures: [AtomicU64; 2],
    latency: [Histogram; 2],
}

#[derive(Debug, Default)]
struct Histogram {
    // Not cumulative; summed at render time.
    buckets: [AtomicU64; LATENCY_SLOTS],
    sum_micros: AtomicU64,
}

impl Histogram {
    fn observe(&self, micros: u64) {
        let slot = LATENCY_BUCKETS_MICROS
            .iter()
            .position(|bound| micros <= *bound)
            .unwrap_or(LATENCY_BUCKETS_MICROS.len());
        self.buckets[slot].fetch_add(1, Ordering::Relaxed);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Vec<u64> {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of failed calls recorded for `op`.
    pub fn failures(&self, op: Operation) -> u64 {
        self.failures[op.index()].load(Ordering::Relaxed)
    }

    /// Number of latency observations recorded for `op`.
    pub fn observations(&self, op: Operation) -> u64 {
        self.latency[op.index()].snapshot().iter().sum()
    }

    /// Render all metrics in the Prometheus text format (version 0.0.4).
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(
            out,
            "# HELP {} Number of failed Cloud KMS operations.",
            FAILURES_METRIC
        );
        let _ = writeln!(out, "# TYPE {} counter", FAILURES_METRIC);
        for op in Operation::ALL {
            let _ = writeln!(
                out,
                "{}{{operation_type=\"{}\"}} {}",
                FAILURES_METRIC,
                op.as_str(),
                self.failures(op)
            );
        }

        let _ = writeln!(
            out,
            "# HELP {} Latency of Cloud KMS operations in microseconds.",
            LATENCY_METRIC
        );
        let _ = writeln!(out, "# TYPE {} histogram", LATENCY_METRIC);
        for op in Operation::ALL {
            let histogram = &self.latency[op.index()];
            let counts = histogram.snapshot();
            let label = op.as_str();

            let mut cumulative = 0;
            for (bound, count) in LATENCY_BUCKETS_MICROS.iter().zip(&counts) {
                cumulative += count;
                let _ = writeln!(
                    out,
                    "{}_bucket{{operation_type=\"{}\",le=\"{}\"}} {}",
                    LATENCY_METRIC, label, bound, cumulative
                );
            }
            let total: u64 = counts.iter().sum();
            let _ = writeln!(
                out,
                "{}_bucket{{operation_type=\"{}\",le=\"+Inf\"}} {}",
                LATENCY_METRIC, label, total
            );
            let _ = writeln!(
                out,
                "{}_sum{{operation_type=\"{}\"}} {}",
                LATENCY_METRIC,
                label,
                histogram.sum_micros.load(Ordering::Relaxed)
            );
            let _ = writeln!(
                out,
                "{}_count{{operation_type=\"{}\"}} {}",
                LATENCY_METRIC, label, total
            );
        }

        out
    }
}

impl MetricsSink for Metrics {
    fn observe_latency(&self, op: Operation, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.latency[op.index()].observe(micros);
    }

    fn inc_failure(&self, op: Operation) {
        self.failures[op.index()].fetch_add(1, Ordering::Relaxed);
    }
}

/// Records one latency observation when dropped.
///
/// Dropping covers every exit path of a backend call, including the caller
/// abandoning the request mid-flight.
pub struct LatencyTimer<'a> {
    sink: &'a dyn MetricsSink,
    op: Operation,
    started: Instant,
}

impl<'a> LatencyTimer<'a> {
    pub fn start(sink: &'a dyn MetricsSink, op: Operation) -> Self {
        Self {
            sink,
            op,
            started: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer<'_> {
    fn drop(&mut self) {
        self.sink.observe_latency(self.op, self.started.elapsed());
    }
}
