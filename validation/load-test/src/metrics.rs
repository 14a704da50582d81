//! Metrics collection and statistics.

use crate::client::Outcome;
use crate::error::MetricsError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Lifecycle of a [`MetricsCollector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running { started: Instant },
    Finalized { started: Instant, ended: Instant },
}

/// Collects outcomes during load test execution.
///
/// Owned by the run controller alone; workers never touch it, so there is no
/// locking. Latencies of successful requests are kept in full and only sorted
/// once when [`results`](Self::results) is called.
pub struct MetricsCollector {
    phase: Phase,
    latencies: Vec<Duration>,
    requests_total: u64,
    requests_failed: u64,
    bytes_total: u64,
    status_codes: BTreeMap<u16, u64>,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            latencies: Vec::with_capacity(1000),
            requests_total: 0,
            requests_failed: 0,
            bytes_total: 0,
            status_codes: BTreeMap::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Record the start time. Only has an effect on an idle collector.
    pub fn start(&mut self) {
        if self.phase == Phase::Idle {
            self.phase = Phase::Running {
                started: Instant::now(),
            };
        }
    }

    /// Record one outcome. Ignored unless running.
    pub fn ingest(&mut self, outcome: Outcome) {
        if !matches!(self.phase, Phase::Running { .. }) {
            return;
        }

        self.requests_total += 1;
        self.bytes_total += outcome.bytes;
        *self.status_codes.entry(outcome.status).or_insert(0) += 1;

        // Failed latencies stay out of the percentile math
        if outcome.success {
            self.latencies.push(outcome.latency);
        } else {
            self.requests_failed += 1;
        }
    }

    /// Record the end time. Calling it again does nothing.
    pub fn finalize(&mut self) {
        let now = Instant::now();
        self.phase = match self.phase {
            Phase::Idle => Phase::Finalized {
                started: now,
                ended: now,
            },
            Phase::Running { started } => Phase::Finalized {
                started,
                ended: now,
            },
            finalized @ Phase::Finalized { .. } => finalized,
        };
    }

    pub fn total_requests(&self) -> u64 {
        self.requests_total
    }

    pub fn failed_requests(&self) -> u64 {
        self.requests_failed
    }

    /// Generate final test results for a run with `threads` workers.
    pub fn results(&mut self, threads: usize) -> Result<TestResults, MetricsError> {
        let Phase::Finalized { started, ended } = self.phase else {
            return Err(MetricsError::NotFinalized);
        };

        self.latencies.sort_unstable();

        let duration_secs = ended.duration_since(started).as_secs_f64();
        let requests_per_second = if duration_secs > 0.0 {
            self.requests_total as f64 / duration_secs
        } else {
            0.0
        };
        let bytes_per_second = if duration_secs > 0.0 {
            self.bytes_total as f64 / duration_secs
        } else {
            0.0
        };
        let success_rate = if self.requests_total > 0 {
            (self.requests_total - self.requests_failed) as f64 / self.requests_total as f64
                * 100.0
        } else {
            0.0
        };

        Ok(TestResults {
            duration_secs,
            total_requests: self.requests_total,
            failed_requests: self.requests_failed,
            had_failures: self.requests_failed > 0,
            success_rate,
            latency_avg: mean_millis(&self.latencies),
            latency_p95: as_millis(percentile(&self.latencies, 0.95)),
            latency_p99: as_millis(percentile(&self.latencies, 0.99)),
            requests_per_second,
            requests_per_second_per_worker: requests_per_second / threads.max(1) as f64,
            bytes_per_second,
            status_codes: self.status_codes.clone(),
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest-rank percentile of an ascending-sorted sample.
///
/// Returns the element at index `ceil(n * p) - 1`, with no interpolation.
/// A single sample is its own percentile; an empty sample yields zero.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    match sorted.len() {
        0 => Duration::ZERO,
        1 => sorted[0],
        n => {
            let rank = (n as f64 * p).ceil() as usize;
            sorted[rank.clamp(1, n) - 1]
        }
    }
}

/// Arithmetic mean in milliseconds, zero for an empty sample.
///
/// Summed in whole nanoseconds and divided as a float, so sub-nanosecond
/// fractions of the mean are kept.
pub fn mean_millis(sample: &[Duration]) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }
    let total: u128 = sample.iter().map(Duration::as_nanos).sum();
    total as f64 / sample.len() as f64 / 1_000_000.0
}

fn as_millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Final test results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResults {
    pub duration_secs: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub had_failures: bool,
    /// Percentage of requests that succeeded.
    pub success_rate: f64,

    // Latency of successful requests (ms)
    pub latency_avg: f64,
    pub latency_p95: f64,
    pub latency_p99: f64,

    // Throughput
    pub requests_per_second: f64,
    pub requests_per_second_per_worker: f64,
    pub bytes_per_second: f64,

    pub status_codes: BTreeMap<u16, u64>,
}

impl TestResults {
    /// Share of all requests that returned `status`, in percent.
    pub fn status_share(&self, status: u16) -> f64 {
        match (self.status_codes.get(&status), self.total_requests) {
            (Some(&count), total) if total > 0 => count as f64 / total as f64 * 100.0,
            _ => 0.0,
        }
    }
}
