//! Typed rows backed by Arrow record batches
//!
//! Every table the engine reads or writes is a plain Rust struct declared with
//! [`define_table!`], which derives the Arrow schema and the conversions
//! between a row slice and a single `RecordBatch`. Decoding accepts any
//! column Arrow can losslessly cast to the declared type, so tables written
//! with microsecond timestamps, 32-bit integers or dictionary-encoded strings
//! read the same as our own artifacts.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Float64Array, Int64Array, StringArray, TimestampMillisecondArray,
    UInt32Array,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};

use crate::error::AnalysisError;
use crate::time::Phase;

/// A Rust type stored as one non-nullable Arrow column
pub trait ColumnValue: Sized {
    fn data_type() -> DataType;
    fn into_array(values: Vec<Self>) -> ArrayRef;
    fn from_array(array: &ArrayRef, column: &str) -> Result<Vec<Self>, AnalysisError>;
}

/// Rows convertible to and from a record batch
pub trait Columnar: Sized {
    fn schema() -> Schema;
    fn to_batch(rows: &[Self]) -> Result<RecordBatch, AnalysisError>;
    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>, AnalysisError>;
}

/// Bring a column to `target`, casting when the stored type differs.
fn coerce(array: &ArrayRef, column: &str, target: &DataType) -> Result<ArrayRef, AnalysisError> {
    let coerced = if array.data_type() == target {
        Arc::clone(array)
    } else {
        cast(array, target).map_err(|e| AnalysisError::SchemaMismatch {
            column: column.to_string(),
            reason: format!("cannot read {} as {}: {}", array.data_type(), target, e),
        })?
    };
    // A cast turns out-of-range values into nulls
    if coerced.null_count() > 0 {
        return Err(AnalysisError::SchemaMismatch {
            column: column.to_string(),
            reason: format!("{} null values", coerced.null_count()),
        });
    }
    Ok(coerced)
}

fn downcast<'a, A: Array + 'static>(
    array: &'a ArrayRef,
    column: &str,
) -> Result<&'a A, AnalysisError> {
    array
        .as_any()
        .downcast_ref::<A>()
        .ok_or_else(|| AnalysisError::SchemaMismatch {
            column: column.to_string(),
            reason: format!("unexpected type {}", array.data_type()),
        })
}

impl ColumnValue for String {
    fn data_type() -> DataType {
        DataType::Utf8
    }

    fn into_array(values: Vec<Self>) -> ArrayRef {
        Arc::new(StringArray::from(values))
    }

    fn from_array(array: &ArrayRef, column: &str) -> Result<Vec<Self>, AnalysisError> {
        let array = coerce(array, column, &Self::data_type())?;
        let strings = downcast::<StringArray>(&array, column)?;
        Ok((0..strings.len())
            .map(|i| strings.value(i).to_string())
            .collect())
    }
}

impl ColumnValue for i64 {
    fn data_type() -> DataType {
        DataType::Int64
    }

    fn into_array(values: Vec<Self>) -> ArrayRef {
        Arc::new(Int64Array::from(values))
    }

    fn from_array(array: &ArrayRef, column: &str) -> Result<Vec<Self>, AnalysisError> {
        let array = coerce(array, column, &Self::data_type())?;
        Ok(downcast::<Int64Array>(&array, column)?.values().to_vec())
    }
}

impl ColumnValue for u32 {
    fn data_type() -> DataType {
        DataType::UInt32
    }

    fn into_array(values: Vec<Self>) -> ArrayRef {
        Arc::new(UInt32Array::from(values))
    }

    fn from_array(array: &ArrayRef, column: &str) -> Result<Vec<Self>, AnalysisError> {
        let array = coerce(array, column, &Self::data_type())?;
        Ok(downcast::<UInt32Array>(&array, column)?.values().to_vec())
    }
}

impl ColumnValue for f64 {
    fn data_type() -> DataType {
        DataType::Float64
    }

    fn into_array(values: Vec<Self>) -> ArrayRef {
        Arc::new(Float64Array::from(values))
    }

    fn from_array(array: &ArrayRef, column: &str) -> Result<Vec<Self>, AnalysisError> {
        let array = coerce(array, column, &Self::data_type())?;
        Ok(downcast::<Float64Array>(&array, column)?.values().to_vec())
    }
}

impl ColumnValue for DateTime<Utc> {
    fn data_type() -> DataType {
        DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()))
    }

    fn into_array(values: Vec<Self>) -> ArrayRef {
        let millis: Vec<i64> = values.iter().map(|ts| ts.timestamp_millis()).collect();
        Arc::new(TimestampMillisecondArray::from(millis).with_timezone("UTC"))
    }

    fn from_array(array: &ArrayRef, column: &str) -> Result<Vec<Self>, AnalysisError> {
        let array = coerce(array, column, &Self::data_type())?;
        let millis = downcast::<TimestampMillisecondArray>(&array, column)?;
        millis
            .values()
            .iter()
            .map(|&ms| {
                DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| {
                    AnalysisError::SchemaMismatch {
                        column: column.to_string(),
                        reason: format!("timestamp {} out of range", ms),
                    }
                })
            })
            .collect()
    }
}

impl ColumnValue for Phase {
    fn data_type() -> DataType {
        DataType::Utf8
    }

    fn into_array(values: Vec<Self>) -> ArrayRef {
        let labels: Vec<&str> = values.iter().map(Phase::as_str).collect();
        Arc::new(StringArray::from(labels))
    }

    fn from_array(array: &ArrayRef, column: &str) -> Result<Vec<Self>, AnalysisError> {
        let array = coerce(array, column, &Self::data_type())?;
        let labels = downcast::<StringArray>(&array, column)?;
        (0..labels.len()).map(|i| labels.value(i).parse()).collect()
    }
}

/// Look up a column by name.
pub fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, AnalysisError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| AnalysisError::SchemaMismatch {
            column: name.to_string(),
            reason: "column missing".to_string(),
        })
}

/// Declare a row struct together with its columnar mapping.
#[macro_export]
macro_rules! define_table {
    (
        $(#[$meta:meta])*
        pub struct $Name:ident {
            $(
                $(#[$fmeta:meta])*
                pub $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, ::serde::Serialize, ::serde::Deserialize)]
        pub struct $Name {
            $(
                $(#[$fmeta])*
                pub $field: $ty,
            )*
        }

        impl $crate::table::Columnar for $Name {
            fn schema() -> ::arrow::datatypes::Schema {
                ::arrow::datatypes::Schema::new(vec![
                    $(
                        ::arrow::datatypes::Field::new(
                            stringify!($field),
                            <$ty as $crate::table::ColumnValue>::data_type(),
                            false,
                        ),
                    )*
                ])
            }

            fn to_batch(
                rows: &[Self],
            ) -> Result<::arrow::record_batch::RecordBatch, $crate::error::AnalysisError> {
                let columns: Vec<::arrow::array::ArrayRef> = vec![
                    $(
                        <$ty as $crate::table::ColumnValue>::into_array(
                            rows.iter().map(|row| row.$field.clone()).collect(),
                        ),
                    )*
                ];
                Ok(::arrow::record_batch::RecordBatch::try_new(
                    ::std::sync::Arc::new(Self::schema()),
                    columns,
                )?)
            }

            fn from_batch(
                batch: &::arrow::record_batch::RecordBatch,
            ) -> Result<Vec<Self>, $crate::error::AnalysisError> {
                $(
                    let mut $field = <$ty as $crate::table::ColumnValue>::from_array(
                        $crate::table::column(batch, stringify!($field))?,
                        stringify!($field),
                    )?
                    .into_iter();
                )*
                let mut rows = Vec::with_capacity(batch.num_rows());
                for _ in 0..batch.num_rows() {
                    rows.push(Self {
                        $(
                            $field: $field.next().ok_or_else(|| {
                                $crate::error::AnalysisError::SchemaMismatch {
                                    column: stringify!($field).to_string(),
                                    reason: "column shorter than batch".to_string(),
                                }
                            })?,
                        )*
                    });
                }
                Ok(rows)
            }
        }
    };
}
