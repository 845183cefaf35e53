//! Best-effort performance sinks: a stage-time log line and an append-only
//! CSV row per invocation. Neither sink may fail the invocation; write
//! failures are logged and swallowed.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::metrics::{MetricsSnapshot, StageTimers};

/// Emit the four-stage timing record (or the basic fallback when detailed
/// timing is unavailable) to the structured log.
pub fn log_stage_times(worker_type: &str, metrics: &MetricsSnapshot, stages: Option<&StageTimers>) {
    match stages {
        Some(stages) => {
            let read_ms = stages.read.elapsed_ms();
            let compute_ms = stages.compute.elapsed_ms();
            let write_cache_ms = stages.write_cache.elapsed_ms();
            let write_file_ms = stages.write_file.elapsed_ms();
            info!(
                worker_type,
                read_ms,
                compute_ms,
                write_cache_ms,
                write_file_ms,
                total_ms = stages.total_ms(),
                read_pct = format_args!("{:.2}", stages.stage_pct(read_ms)),
                compute_pct = format_args!("{:.2}", stages.stage_pct(compute_ms)),
                write_cache_pct = format_args!("{:.2}", stages.stage_pct(write_cache_ms)),
                write_file_pct = format_args!("{:.2}", stages.stage_pct(write_file_ms)),
                "four-stage performance metrics"
            );
        }
        None => {
            let total_ms = metrics.input_cost_ms + metrics.compute_cost_ms + metrics.output_cost_ms;
            info!(
                worker_type,
                read_ms = metrics.input_cost_ms,
                compute_ms = metrics.compute_cost_ms,
                output_ms = metrics.output_cost_ms,
                total_ms,
                "basic performance metrics"
            );
        }
    }
}

/// Append one perf row to the CSV file at `path`, writing the header first
/// when the file does not exist yet. Best effort: errors are warned, not
/// returned.
pub fn write_perf_csv(
    path: &Path,
    worker_type: &str,
    metrics: &MetricsSnapshot,
    stages: Option<&StageTimers>,
) {
    if let Err(e) = try_write_perf_csv(path, worker_type, metrics, stages) {
        warn!(
            path = %path.display(),
            error = %e,
            "failed to write perf metrics CSV row"
        );
    }
}

fn try_write_perf_csv(
    path: &Path,
    worker_type: &str,
    metrics: &MetricsSnapshot,
    stages: Option<&StageTimers>,
) -> std::io::Result<()> {
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64);
    let is_new = !path.exists();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    match stages {
        Some(stages) => {
            if is_new {
                writeln!(
                    file,
                    "Timestamp,WorkerType,ReadTimeMs,ComputeTimeMs,WriteCacheTimeMs,WriteFileTimeMs,ComputePct,WriteCachePct,WriteFilePct,StoragePct"
                )?;
            }
            let read_ms = stages.read.elapsed_ms();
            let compute_ms = stages.compute.elapsed_ms();
            let write_cache_ms = stages.write_cache.elapsed_ms();
            let write_file_ms = stages.write_file.elapsed_ms();
            writeln!(
                file,
                "{},{},{},{},{},{},{:.2},{:.2},{:.2},{:.2}",
                timestamp_ms,
                worker_type,
                read_ms,
                compute_ms,
                write_cache_ms,
                write_file_ms,
                stages.stage_pct(compute_ms),
                stages.stage_pct(write_cache_ms),
                stages.stage_pct(write_file_ms),
                stages.stage_pct(read_ms + write_file_ms),
            )?;
        }
        None => {
            if is_new {
                writeln!(
                    file,
                    "Timestamp,WorkerType,ReadTimeMs,ComputeTimeMs,OutputTimeMs,TotalTimeMs,ReadPct"
                )?;
            }
            let total_ms = metrics.input_cost_ms + metrics.compute_cost_ms + metrics.output_cost_ms;
            let read_pct = if total_ms > 0 {
                metrics.input_cost_ms as f64 * 100.0 / total_ms as f64
            } else {
                0.0
            };
            writeln!(
                file,
                "{},{},{},{},{},{},{:.2}",
                timestamp_ms,
                worker_type,
                metrics.input_cost_ms,
                metrics.compute_cost_ms,
                metrics.output_cost_ms,
                total_ms,
                read_pct,
            )?;
        }
    }
    file.flush()
}
