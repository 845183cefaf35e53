use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum rows per row batch flowing through the pipeline.
    pub batch_size_rows: usize,
    /// Split worker pool size as a multiple of available hardware parallelism.
    pub pool_size_per_core: usize,
    /// Fixed pool size override; takes precedence over `pool_size_per_core` when set.
    pub pool_size_override: Option<usize>,
    /// Append-only CSV perf log path; `None` disables the sink.
    pub perf_log_path: Option<String>,
    /// Emit four-stage timing detail to the perf sinks instead of basic metrics.
    pub detailed_perf: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size_rows: 8192,
            pool_size_per_core: 2,
            pool_size_override: None,
            perf_log_path: None,
            detailed_perf: true,
        }
    }
}

impl WorkerConfig {
    /// Split pool size for one invocation, fixed for its duration.
    pub fn pool_size(&self) -> usize {
        if let Some(n) = self.pool_size_override {
            return n.max(1);
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cores * self.pool_size_per_core).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::WorkerConfig;

    #[test]
    fn pool_size_override_wins() {
        let cfg = WorkerConfig {
            pool_size_override: Some(1),
            ..WorkerConfig::default()
        };
        assert_eq!(cfg.pool_size(), 1);
    }

    #[test]
    fn pool_size_is_never_zero() {
        let cfg = WorkerConfig {
            pool_size_per_core: 0,
            ..WorkerConfig::default()
        };
        assert!(cfg.pool_size() >= 1);
    }
}
