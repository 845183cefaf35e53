//! Deterministic key-column hashing for partition assignment.
//!
//! Hashes combine across key columns with a 31-multiplier chain, so integer
//! single-key partitioning degenerates to `value mod num_partitions`. The
//! mapping is a pure function of the key values: the same key lands in the
//! same partition regardless of which split, batch, or worker produced it.

use arrow::array::{
    Array, BooleanArray, Date32Array, Float32Array, Float64Array, Int16Array, Int32Array,
    Int64Array, Int8Array, LargeStringArray, StringArray, UInt16Array, UInt32Array, UInt64Array,
    UInt8Array,
};
use arrow::record_batch::RecordBatch;
use arrow_schema::DataType;
use partq_common::{PartqError, Result};

/// Compute the partition id of every row in `batch` from `key_columns`.
///
/// `ids` is cleared and refilled so the scan loop can reuse one buffer.
pub fn partition_ids(
    batch: &RecordBatch,
    key_columns: &[usize],
    num_partitions: usize,
    ids: &mut Vec<u32>,
) -> Result<()> {
    let mut hashes = vec![0u64; batch.num_rows()];
    for &col in key_columns {
        let array = batch.columns().get(col).ok_or_else(|| {
            PartqError::InvalidInput(format!(
                "key column id {col} outside batch with {} columns",
                batch.num_columns()
            ))
        })?;
        hash_array_into(array.as_ref(), &mut hashes)?;
    }
    ids.clear();
    ids.extend(hashes.iter().map(|h| (*h % num_partitions as u64) as u32));
    Ok(())
}

fn combine(acc: u64, elem: u64) -> u64 {
    acc.wrapping_mul(31).wrapping_add(elem)
}

fn hash_array_into(array: &dyn Array, hashes: &mut [u64]) -> Result<()> {
    match array.data_type() {
        DataType::Boolean => {
            let a = downcast::<BooleanArray>(array)?;
            for (i, h) in hashes.iter_mut().enumerate() {
                let elem = if a.is_null(i) { 0 } else { a.value(i) as u64 };
                *h = combine(*h, elem);
            }
        }
        DataType::Int8 => hash_values(downcast::<Int8Array>(array)?, hashes, |v| v as u64),
        DataType::Int16 => hash_values(downcast::<Int16Array>(array)?, hashes, |v| v as u64),
        DataType::Int32 => hash_values(downcast::<Int32Array>(array)?, hashes, |v| v as u64),
        DataType::Int64 => hash_values(downcast::<Int64Array>(array)?, hashes, |v| v as u64),
        DataType::UInt8 => hash_values(downcast::<UInt8Array>(array)?, hashes, |v| v as u64),
        DataType::UInt16 => hash_values(downcast::<UInt16Array>(array)?, hashes, |v| v as u64),
        DataType::UInt32 => hash_values(downcast::<UInt32Array>(array)?, hashes, |v| v as u64),
        DataType::UInt64 => hash_values(downcast::<UInt64Array>(array)?, hashes, |v| v),
        DataType::Date32 => hash_values(downcast::<Date32Array>(array)?, hashes, |v| v as u64),
        DataType::Float32 => {
            hash_values(downcast::<Float32Array>(array)?, hashes, |v| {
                v.to_bits() as u64
            })
        }
        DataType::Float64 => hash_values(downcast::<Float64Array>(array)?, hashes, |v| v.to_bits()),
        DataType::Utf8 => {
            let a = downcast::<StringArray>(array)?;
            for (i, h) in hashes.iter_mut().enumerate() {
                let elem = if a.is_null(i) { 0 } else { fnv1a(a.value(i).as_bytes()) };
                *h = combine(*h, elem);
            }
        }
        DataType::LargeUtf8 => {
            let a = downcast::<LargeStringArray>(array)?;
            for (i, h) in hashes.iter_mut().enumerate() {
                let elem = if a.is_null(i) { 0 } else { fnv1a(a.value(i).as_bytes()) };
                *h = combine(*h, elem);
            }
        }
        other => {
            return Err(PartqError::Unsupported(format!(
                "hash partitioning on key column type {other} is not supported"
            )));
        }
    }
    Ok(())
}

fn hash_values<A, T>(array: &A, hashes: &mut [u64], elem: impl Fn(T) -> u64)
where
    A: Array + ArrayValue<T> + 'static,
{
    for (i, h) in hashes.iter_mut().enumerate() {
        let e = if array.is_null(i) { 0 } else { elem(array.value_at(i)) };
        *h = combine(*h, e);
    }
}

/// Minimal by-index value access shared by the primitive hash loops.
trait ArrayValue<T> {
    fn value_at(&self, i: usize) -> T;
}

macro_rules! impl_array_value {
    ($array:ty, $value:ty) => {
        impl ArrayValue<$value> for $array {
            fn value_at(&self, i: usize) -> $value {
                self.value(i)
            }
        }
    };
}

impl_array_value!(Int8Array, i8);
impl_array_value!(Int16Array, i16);
impl_array_value!(Int32Array, i32);
impl_array_value!(Int64Array, i64);
impl_array_value!(UInt8Array, u8);
impl_array_value!(UInt16Array, u16);
impl_array_value!(UInt32Array, u32);
impl_array_value!(UInt64Array, u64);
impl_array_value!(Date32Array, i32);
impl_array_value!(Float32Array, f32);
impl_array_value!(Float64Array, f64);

fn downcast<A: 'static>(array: &dyn Array) -> Result<&A> {
    array
        .as_any()
        .downcast_ref::<A>()
        .ok_or_else(|| PartqError::Execution("key column downcast failed".to_string()))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h = 0xcbf2_9ce4_8422_2325_u64;
    for b in bytes {
        h ^= *b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}
