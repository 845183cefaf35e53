//! Per-invocation worker metrics and the four-stage timer cluster.
//!
//! Both structures are created fresh for every invocation and shared by
//! reference across all split tasks of that invocation; all counters are
//! add-only atomics, so concurrent increments need no locking. Stage timers
//! are cumulative across concurrent tasks: their sum may exceed wall-clock
//! duration, and percentage breakdowns are computed against the stage-sum
//! baseline, not wall clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One cumulative stage timer, safe for concurrent increment.
#[derive(Debug, Default)]
pub struct StageTimer {
    elapsed_ns: AtomicU64,
}

impl StageTimer {
    pub fn add(&self, elapsed: Duration) {
        self.elapsed_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn elapsed_ns(&self) -> u64 {
        self.elapsed_ns.load(Ordering::Relaxed)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ns() / 1_000_000
    }
}

/// Timers for the four performance stages: READ, COMPUTE, WRITE_CACHE, WRITE_FILE.
///
/// Callers that do not want detailed timing pass a fresh value and ignore it;
/// there is no process-wide timer state.
#[derive(Debug, Default)]
pub struct StageTimers {
    pub read: StageTimer,
    pub compute: StageTimer,
    pub write_cache: StageTimer,
    pub write_file: StageTimer,
}

impl StageTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of the four stage times. Superlinear under concurrency.
    pub fn total_ms(&self) -> u64 {
        self.read.elapsed_ms()
            + self.compute.elapsed_ms()
            + self.write_cache.elapsed_ms()
            + self.write_file.elapsed_ms()
    }

    /// Percentage of one stage against the stage-sum baseline.
    pub fn stage_pct(&self, stage_ms: u64) -> f64 {
        let total = self.total_ms();
        if total == 0 {
            return 0.0;
        }
        stage_ms as f64 * 100.0 / total as f64
    }
}

/// Invocation-wide counters aggregated across all split tasks.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    num_read_requests: AtomicU64,
    num_write_requests: AtomicU64,
    read_bytes: AtomicU64,
    write_bytes: AtomicU64,
    input_cost_ns: AtomicU64,
    output_cost_ns: AtomicU64,
    compute_cost_ns: AtomicU64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_num_read_requests(&self, n: u64) {
        self.num_read_requests.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_num_write_requests(&self, n: u64) {
        self.num_write_requests.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_read_bytes(&self, n: u64) {
        self.read_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_write_bytes(&self, n: u64) {
        self.write_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_input_cost(&self, elapsed: Duration) {
        self.input_cost_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn add_output_cost(&self, elapsed: Duration) {
        self.output_cost_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn add_compute_cost(&self, elapsed: Duration) {
        self.compute_cost_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            num_read_requests: self.num_read_requests.load(Ordering::Relaxed),
            num_write_requests: self.num_write_requests.load(Ordering::Relaxed),
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
            input_cost_ms: self.input_cost_ns.load(Ordering::Relaxed) / 1_000_000,
            output_cost_ms: self.output_cost_ns.load(Ordering::Relaxed) / 1_000_000,
            compute_cost_ms: self.compute_cost_ns.load(Ordering::Relaxed) / 1_000_000,
        }
    }
}

/// Point-in-time view of [`WorkerMetrics`], embedded in the worker response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub num_read_requests: u64,
    pub num_write_requests: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub input_cost_ms: u64,
    pub output_cost_ms: u64,
    pub compute_cost_ms: u64,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{StageTimers, WorkerMetrics};

    #[test]
    fn counters_accumulate_across_threads() {
        let metrics = Arc::new(WorkerMetrics::new());
        let handles = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        m.add_read_bytes(3);
                        m.add_num_read_requests(1);
                    }
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.join().expect("join");
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.read_bytes, 1200);
        assert_eq!(snap.num_read_requests, 400);
    }

    #[test]
    fn stage_timers_are_cumulative() {
        let timers = StageTimers::new();
        timers.read.add(Duration::from_millis(5));
        timers.read.add(Duration::from_millis(7));
        timers.compute.add(Duration::from_millis(8));
        assert_eq!(timers.read.elapsed_ms(), 12);
        assert_eq!(timers.total_ms(), 20);
    }

    #[test]
    fn stage_pct_uses_stage_sum_baseline() {
        let timers = StageTimers::new();
        timers.read.add(Duration::from_millis(30));
        timers.write_file.add(Duration::from_millis(10));
        let pct = timers.stage_pct(timers.read.elapsed_ms());
        assert!((pct - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stage_pct_handles_zero_total() {
        let timers = StageTimers::new();
        assert_eq!(timers.stage_pct(0), 0.0);
    }

    #[test]
    fn cost_durations_convert_to_ms() {
        let metrics = WorkerMetrics::new();
        metrics.add_input_cost(Duration::from_micros(2500));
        metrics.add_compute_cost(Duration::from_millis(3));
        let snap = metrics.snapshot();
        assert_eq!(snap.input_cost_ms, 2);
        assert_eq!(snap.compute_cost_ms, 3);
    }
}
