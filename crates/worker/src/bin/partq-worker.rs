use std::env;
use std::io::Read;

use partq_common::WorkerConfig;
use partq_worker::{PartitionRequest, PartitionWorker};
use tracing_subscriber::EnvFilter;

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse::<usize>().ok())
}

fn env_bool_or_default(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(default)
}

fn read_request(args: &[String]) -> Result<String, Box<dyn std::error::Error>> {
    match args.first().map(String::as_str) {
        None | Some("-") => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            Ok(raw)
        }
        Some(path) => Ok(std::fs::read_to_string(path)?),
    }
}

fn print_usage() {
    println!("usage: partq-worker [REQUEST_JSON_PATH | -]");
    println!();
    println!("Reads one PartitionRequest JSON document (from the given path, or stdin");
    println!("when the path is '-' or omitted), runs the partition pipeline, and prints");
    println!("the PartitionOutput JSON on stdout.");
    println!();
    println!("environment:");
    println!("  PARTQ_BATCH_SIZE_ROWS  rows per batch (default 8192)");
    println!("  PARTQ_POOL_SIZE        fixed split pool size (default 2x cores)");
    println!("  PARTQ_PERF_LOG         CSV perf log path (default: disabled)");
    println!("  PARTQ_DETAILED_PERF    four-stage perf detail (default true)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let args = env::args().skip(1).collect::<Vec<_>>();
    if args
        .first()
        .map(|a| a == "--help" || a == "-h")
        .unwrap_or(false)
    {
        print_usage();
        return Ok(());
    }

    let mut config = WorkerConfig::default();
    if let Some(batch_size) = env_usize("PARTQ_BATCH_SIZE_ROWS") {
        config.batch_size_rows = batch_size;
    }
    config.pool_size_override = env_usize("PARTQ_POOL_SIZE");
    config.perf_log_path = env::var("PARTQ_PERF_LOG").ok();
    config.detailed_perf = env_bool_or_default("PARTQ_DETAILED_PERF", true);

    let raw = read_request(&args)?;
    let request: PartitionRequest = serde_json::from_str(&raw)?;

    let worker = PartitionWorker::new(config);
    let output = worker.process(request).await;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
