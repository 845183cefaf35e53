//! Table scan filter and the scanner applying filter + projection per batch.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
    Int8Array, Scalar, StringArray, UInt32Array, UInt64Array,
};
use arrow::compute::kernels::cmp;
use arrow::compute::{and, filter_record_batch, is_not_null, is_null, prep_null_mask_filter};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, SchemaRef};
use partq_common::{PartqError, Result};
use serde::{Deserialize, Serialize};

/// Conjunctive scan predicate, deserialized from the request's serialized
/// filter expression. An empty conjunct list matches every row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableScanFilter {
    #[serde(default)]
    pub conjuncts: Vec<ColumnPredicate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnPredicate {
    pub column: String,
    pub op: CompareOp,
    #[serde(default)]
    pub value: Option<Literal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl TableScanFilter {
    /// Parse the serialized filter carried in the table descriptor. An empty
    /// string means no filter.
    pub fn from_json(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw)
            .map_err(|e| PartqError::InvalidInput(format!("invalid scan filter: {e}")))
    }

    pub fn is_trivial(&self) -> bool {
        self.conjuncts.is_empty()
    }

    /// Row mask for `batch`: true where every conjunct holds.
    pub fn matches(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        let mut mask: Option<BooleanArray> = None;
        for pred in &self.conjuncts {
            let m = pred.evaluate(batch)?;
            mask = Some(match mask {
                Some(acc) => and(&acc, &m)
                    .map_err(|e| PartqError::Execution(format!("filter combine failed: {e}")))?,
                None => m,
            });
        }
        match mask {
            Some(m) if m.null_count() > 0 => Ok(prep_null_mask_filter(&m)),
            Some(m) => Ok(m),
            None => Ok(BooleanArray::from(vec![true; batch.num_rows()])),
        }
    }
}

impl ColumnPredicate {
    fn evaluate(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        let idx = batch.schema().index_of(&self.column).map_err(|_| {
            PartqError::InvalidInput(format!("filter references unknown column '{}'", self.column))
        })?;
        let col = batch.column(idx).clone();

        match self.op {
            CompareOp::IsNull => {
                return is_null(col.as_ref())
                    .map_err(|e| PartqError::Execution(format!("is_null failed: {e}")));
            }
            CompareOp::IsNotNull => {
                return is_not_null(col.as_ref())
                    .map_err(|e| PartqError::Execution(format!("is_not_null failed: {e}")));
            }
            _ => {}
        }

        let value = self.value.as_ref().ok_or_else(|| {
            PartqError::InvalidInput(format!(
                "filter on column '{}' requires a literal value",
                self.column
            ))
        })?;
        let literal = literal_array(value, col.data_type())?;
        let scalar = Scalar::new(literal);
        let result = match self.op {
            CompareOp::Eq => cmp::eq(&col, &scalar),
            CompareOp::Ne => cmp::neq(&col, &scalar),
            CompareOp::Lt => cmp::lt(&col, &scalar),
            CompareOp::Le => cmp::lt_eq(&col, &scalar),
            CompareOp::Gt => cmp::gt(&col, &scalar),
            CompareOp::Ge => cmp::gt_eq(&col, &scalar),
            CompareOp::IsNull | CompareOp::IsNotNull => unreachable!("handled above"),
        };
        result.map_err(|e| {
            PartqError::Execution(format!("filter on column '{}' failed: {e}", self.column))
        })
    }
}

fn literal_array(value: &Literal, dt: &DataType) -> Result<ArrayRef> {
    let array: ArrayRef = match (dt, value) {
        (DataType::Boolean, Literal::Bool(v)) => Arc::new(BooleanArray::from(vec![*v])),
        (DataType::Int8, Literal::Int(v)) => Arc::new(Int8Array::from(vec![*v as i8])),
        (DataType::Int16, Literal::Int(v)) => Arc::new(Int16Array::from(vec![*v as i16])),
        (DataType::Int32, Literal::Int(v)) => Arc::new(Int32Array::from(vec![*v as i32])),
        (DataType::Int64, Literal::Int(v)) => Arc::new(Int64Array::from(vec![*v])),
        (DataType::UInt32, Literal::Int(v)) => Arc::new(UInt32Array::from(vec![*v as u32])),
        (DataType::UInt64, Literal::Int(v)) => Arc::new(UInt64Array::from(vec![*v as u64])),
        (DataType::Float32, Literal::Int(v)) => Arc::new(Float32Array::from(vec![*v as f32])),
        (DataType::Float32, Literal::Float(v)) => Arc::new(Float32Array::from(vec![*v as f32])),
        (DataType::Float64, Literal::Int(v)) => Arc::new(Float64Array::from(vec![*v as f64])),
        (DataType::Float64, Literal::Float(v)) => Arc::new(Float64Array::from(vec![*v])),
        (DataType::Utf8, Literal::Str(v)) => Arc::new(StringArray::from(vec![v.as_str()])),
        (dt, value) => {
            return Err(PartqError::Unsupported(format!(
                "filter literal {value:?} is not comparable to column type {dt}"
            )));
        }
    };
    Ok(array)
}

/// Applies filter + projection to the raw batches of one split. Built once
/// per split from the reader's result schema; `output_schema` is the writer
/// schema candidate.
pub struct Scanner {
    output_indices: Vec<usize>,
    output_schema: SchemaRef,
    filter: TableScanFilter,
}

impl Scanner {
    pub fn new(
        result_schema: &SchemaRef,
        columns_to_read: &[String],
        projection: &[bool],
        filter: TableScanFilter,
    ) -> Result<Self> {
        if !projection.is_empty() && projection.len() != columns_to_read.len() {
            return Err(PartqError::InvalidInput(format!(
                "projection mask has {} entries for {} columns to read",
                projection.len(),
                columns_to_read.len()
            )));
        }
        let mut output_indices = Vec::with_capacity(columns_to_read.len());
        for (i, name) in columns_to_read.iter().enumerate() {
            let idx = result_schema.index_of(name).map_err(|_| {
                PartqError::InvalidInput(format!("column '{name}' missing from scan schema"))
            })?;
            if projection.is_empty() || projection[i] {
                output_indices.push(idx);
            }
        }
        if output_indices.is_empty() {
            return Err(PartqError::InvalidInput(
                "projection keeps no output columns".to_string(),
            ));
        }
        let output_schema = Arc::new(result_schema.project(&output_indices).map_err(|e| {
            PartqError::Execution(format!("failed to project output schema: {e}"))
        })?);
        Ok(Self {
            output_indices,
            output_schema,
            filter,
        })
    }

    pub fn output_schema(&self) -> SchemaRef {
        self.output_schema.clone()
    }

    /// Filter the batch, then narrow it to the projected columns. The result
    /// may be empty; callers skip partitioning for empty batches.
    pub fn filter_and_project(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        let filtered = if self.filter.is_trivial() {
            batch.clone()
        } else {
            let mask = self.filter.matches(batch)?;
            filter_record_batch(batch, &mask)
                .map_err(|e| PartqError::Execution(format!("filter batch failed: {e}")))?
        };
        filtered
            .project(&self.output_indices)
            .map_err(|e| PartqError::Execution(format!("project batch failed: {e}")))
    }
}
