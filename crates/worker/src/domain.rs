//! Request/response domain types: the worker's external contract.
//!
//! Requests arrive as JSON from the invoking planner/scheduler; responses
//! are always well-formed [`PartitionOutput`] values, successful or not.

use std::collections::{BTreeSet, HashMap};

use partq_common::{MetricsSnapshot, PartqError, Result};
use partq_storage::StorageScheme;
use serde::{Deserialize, Serialize};

/// One partition-worker invocation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionRequest {
    /// Transaction id of the enclosing query, for log correlation and
    /// storage backends with read consistency.
    #[serde(default)]
    pub trans_id: u64,
    /// Transaction timestamp accompanying `trans_id`.
    #[serde(default)]
    pub timestamp: u64,
    /// Input table descriptor. Required.
    pub table: Option<TableInfo>,
    /// Hash partitioning descriptor. Required.
    pub partition: Option<PartitionInfo>,
    /// Output mask over `columns_to_read`; empty keeps every column.
    #[serde(default)]
    pub projection: Vec<bool>,
    /// Output object descriptor. Required.
    pub output: Option<OutputInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub table_name: String,
    pub storage: StorageInfo,
    pub input_splits: Vec<InputSplit>,
    pub columns_to_read: Vec<String>,
    /// Serialized scan filter; empty matches all rows.
    #[serde(default)]
    pub filter: String,
}

/// One unit of scan work, owned by exactly one split processor. A split may
/// span several storage objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSplit {
    pub inputs: Vec<SplitInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitInput {
    pub path: String,
    /// First row group to scan.
    #[serde(default)]
    pub rg_start: usize,
    /// Declared row-group count; clamped against the object's actual size
    /// before any read.
    pub rg_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionInfo {
    /// Number of output hash partitions (N >= 1).
    pub num_partitions: usize,
    /// Key column indices into the projected output schema.
    pub key_column_ids: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageInfo {
    pub scheme: StorageScheme,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputInfo {
    pub storage: StorageInfo,
    pub target: OutputTarget,
    /// Compress the output payload.
    #[serde(default)]
    pub encoding: bool,
}

/// Where the partitioned output object goes. Path resolution is a pure
/// function of this descriptor; nothing is synthesized from table names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputTarget {
    /// A fully resolved object path.
    File { path: String },
    /// A folder plus explicit file names; the first name is used.
    Folder {
        folder: String,
        #[serde(default)]
        file_names: Vec<String>,
    },
}

impl OutputTarget {
    pub fn resolve_path(&self) -> Result<String> {
        match self {
            OutputTarget::File { path } => {
                if path.is_empty() {
                    return Err(PartqError::InvalidInput(
                        "output file path must not be empty".to_string(),
                    ));
                }
                Ok(path.clone())
            }
            OutputTarget::Folder { folder, file_names } => {
                if folder.is_empty() {
                    return Err(PartqError::InvalidInput(
                        "output folder must not be empty".to_string(),
                    ));
                }
                let name = file_names.first().ok_or_else(|| {
                    PartqError::InvalidInput(
                        "folder output target requires at least one file name".to_string(),
                    )
                })?;
                Ok(format!("{}/{}", folder.trim_end_matches('/'), name))
            }
        }
    }
}

/// The invocation's sole output. Always well-formed: a failed invocation
/// carries `successful = false`, a message, and the duration, never an Err.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionOutput {
    pub successful: bool,
    #[serde(default)]
    pub error_message: String,
    /// Paths of the output objects actually produced.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Exactly the hash partitions that received at least one row.
    #[serde(default)]
    pub hash_values: BTreeSet<u32>,
    pub duration_ms: u64,
    #[serde(default)]
    pub metrics: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use partq_storage::StorageScheme;

    use super::{OutputTarget, PartitionRequest};

    #[test]
    fn file_target_resolves_verbatim() {
        let target = OutputTarget::File {
            path: "/data/out/partitioned.parquet".to_string(),
        };
        assert_eq!(
            target.resolve_path().expect("path"),
            "/data/out/partitioned.parquet"
        );
    }

    #[test]
    fn folder_target_joins_first_file_name() {
        let target = OutputTarget::Folder {
            folder: "mem://intermediate/partition/".to_string(),
            file_names: vec!["part-0.parquet".to_string(), "ignored.parquet".to_string()],
        };
        assert_eq!(
            target.resolve_path().expect("path"),
            "mem://intermediate/partition/part-0.parquet"
        );
    }

    #[test]
    fn folder_target_without_file_names_is_invalid() {
        let target = OutputTarget::Folder {
            folder: "mem://intermediate".to_string(),
            file_names: Vec::new(),
        };
        assert!(target.resolve_path().is_err());
    }

    #[test]
    fn request_parses_with_missing_composites() {
        let request: PartitionRequest =
            serde_json::from_str(r#"{"trans_id": 7}"#).expect("parse");
        assert_eq!(request.trans_id, 7);
        assert!(request.table.is_none());
        assert!(request.partition.is_none());
        assert!(request.output.is_none());
        assert!(request.projection.is_empty());
    }

    #[test]
    fn request_round_trips_through_json() {
        let raw = r#"{
            "trans_id": 42,
            "timestamp": 99,
            "table": {
                "table_name": "orders",
                "storage": {"scheme": "memory"},
                "input_splits": [
                    {"inputs": [{"path": "mem://orders/part0", "rg_start": 0, "rg_count": 2}]}
                ],
                "columns_to_read": ["id", "amount"],
                "filter": ""
            },
            "partition": {"num_partitions": 4, "key_column_ids": [0]},
            "projection": [true, true],
            "output": {
                "storage": {"scheme": "memory"},
                "target": {"kind": "file", "path": "mem://out/orders.parquet"},
                "encoding": true
            }
        }"#;
        let request: PartitionRequest = serde_json::from_str(raw).expect("parse");
        let table = request.table.as_ref().expect("table");
        assert_eq!(table.table_name, "orders");
        assert_eq!(table.storage.scheme, StorageScheme::Memory);
        assert_eq!(table.input_splits.len(), 1);
        let encoded = serde_json::to_string(&request).expect("encode");
        let decoded: PartitionRequest = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded.partition.expect("partition").num_partitions, 4);
    }
}
