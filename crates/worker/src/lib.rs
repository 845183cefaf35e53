//! The partq partition worker.
//!
//! One invocation reads the input splits of one logical table, applies the
//! request's filter and projection, redistributes the surviving rows into N
//! hash partitions, and serializes every partition into a single output
//! object, recording per-stage timing (READ / COMPUTE / WRITE_CACHE /
//! WRITE_FILE) and invocation-wide metrics.
//!
//! Key modules:
//! - [`domain`]: request/response types (the worker's external contract)
//! - [`split`]: the per-split processor run on the worker pool
//! - [`worker`]: the pipeline orchestrator ([`worker::PartitionWorker`])
//!
//! Failure semantics are all-or-nothing: any split task failure fails the
//! whole invocation, and the caller always receives a well-formed
//! [`domain::PartitionOutput`] rather than an error.

pub mod domain;
pub mod split;
pub mod worker;

pub use domain::{
    InputSplit, OutputInfo, OutputTarget, PartitionInfo, PartitionOutput, PartitionRequest,
    SplitInput, StorageInfo, TableInfo,
};
pub use worker::PartitionWorker;
