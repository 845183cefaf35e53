use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    invocations: CounterVec,
    rows_partitioned: CounterVec,
    bytes_read: CounterVec,
    bytes_written: CounterVec,
    stage_seconds: HistogramVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn record_invocation(
        &self,
        worker_type: &str,
        successful: bool,
        rows: u64,
        bytes_read: u64,
        bytes_written: u64,
    ) {
        let outcome = if successful { "success" } else { "failure" };
        self.inner
            .invocations
            .with_label_values(&[worker_type, outcome])
            .inc();
        self.inner
            .rows_partitioned
            .with_label_values(&[worker_type])
            .inc_by(rows as f64);
        self.inner
            .bytes_read
            .with_label_values(&[worker_type])
            .inc_by(bytes_read as f64);
        self.inner
            .bytes_written
            .with_label_values(&[worker_type])
            .inc_by(bytes_written as f64);
    }

    pub fn record_stage_seconds(&self, worker_type: &str, stage: &str, secs: f64) {
        self.inner
            .stage_seconds
            .with_label_values(&[worker_type, stage])
            .observe(secs.max(0.0));
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let invocations = counter_vec(
            &registry,
            "partq_invocations_total",
            "Worker invocations by outcome",
            &["worker_type", "outcome"],
        );
        let rows_partitioned = counter_vec(
            &registry,
            "partq_rows_partitioned_total",
            "Rows written to partitioned outputs",
            &["worker_type"],
        );
        let bytes_read = counter_vec(
            &registry,
            "partq_bytes_read_total",
            "Bytes read from input splits",
            &["worker_type"],
        );
        let bytes_written = counter_vec(
            &registry,
            "partq_bytes_written_total",
            "Bytes written to partitioned outputs",
            &["worker_type"],
        );
        let stage_seconds = histogram_vec(
            &registry,
            "partq_stage_seconds",
            "Cumulative per-stage time per invocation",
            &["worker_type", "stage"],
        );

        Self {
            registry,
            invocations,
            rows_partitioned,
            bytes_read,
            bytes_written,
            stage_seconds,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;

    #[test]
    fn renders_prometheus_text() {
        let m = MetricsRegistry::new();
        m.record_invocation("PartitionWorker", true, 128, 4096, 2048);
        m.record_stage_seconds("PartitionWorker", "read", 0.01);
        let text = m.render_prometheus();
        assert!(text.contains("partq_invocations_total"));
        assert!(text.contains("partq_rows_partitioned_total"));
        assert!(text.contains("partq_stage_seconds"));
        assert!(text.contains("PartitionWorker"));
    }

    #[test]
    fn failure_outcome_is_labeled() {
        let m = MetricsRegistry::new();
        m.record_invocation("PartitionWorker", false, 0, 0, 0);
        let text = m.render_prometheus();
        assert!(text.contains("outcome=\"failure\""));
    }
}
