//! `data-schema` header support: coerce results to a client-supplied schema.
//!
//! The header value is a URL-encoded, comma-separated list of
//! `name type` pairs (`one string`). When the target arity matches the
//! result, each column is cast to the target type and renamed; used by
//! clients for simple type casts on scalar results.

use std::sync::Arc;

use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use duckgate_common::{GateError, Result};

/// One requested output column.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetField {
    /// Output column name.
    pub name: String,
    /// Output Arrow type.
    pub data_type: DataType,
}

/// Parse the URL-encoded header value.
pub fn parse_data_schema(header: &str) -> Result<Vec<TargetField>> {
    let decoded = urlencoding::decode(header)
        .map_err(|e| GateError::BadRequest(format!("invalid data-schema header: {e}")))?;
    decoded
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            let mut words = part.split_whitespace();
            let name = words
                .next()
                .ok_or_else(|| GateError::BadRequest("empty data-schema field".to_string()))?;
            let type_name = words.next().ok_or_else(|| {
                GateError::BadRequest(format!("data-schema field {name:?} has no type"))
            })?;
            Ok(TargetField {
                name: name.to_string(),
                data_type: data_type_of(type_name)?,
            })
        })
        .collect()
}

fn data_type_of(type_name: &str) -> Result<DataType> {
    Ok(match type_name.to_ascii_lowercase().as_str() {
        "string" | "varchar" | "text" => DataType::Utf8,
        "int" | "integer" | "int4" => DataType::Int32,
        "bigint" | "long" | "int8" => DataType::Int64,
        "smallint" | "int2" => DataType::Int16,
        "float" | "real" => DataType::Float32,
        "double" => DataType::Float64,
        "boolean" | "bool" => DataType::Boolean,
        "date" => DataType::Date32,
        "timestamp" => DataType::Timestamp(TimeUnit::Microsecond, None),
        other => {
            return Err(GateError::BadRequest(format!(
                "unsupported data-schema type: {other}"
            )))
        }
    })
}

/// The schema the stream will carry after coercion. Arity mismatches leave
/// the engine schema untouched.
pub fn coerce_schema(schema: &SchemaRef, targets: &[TargetField]) -> SchemaRef {
    if schema.fields().len() != targets.len() {
        return Arc::clone(schema);
    }
    Arc::new(Schema::new(
        targets
            .iter()
            .map(|t| Field::new(t.name.clone(), t.data_type.clone(), true))
            .collect::<Vec<_>>(),
    ))
}

/// Cast and rename a batch's columns to the targets. Arity mismatches pass
/// the batch through unchanged.
pub fn coerce_batch(batch: &RecordBatch, targets: &[TargetField]) -> Result<RecordBatch> {
    if batch.num_columns() != targets.len() {
        return Ok(batch.clone());
    }
    let columns = batch
        .columns()
        .iter()
        .zip(targets)
        .map(|(column, target)| {
            cast(column, &target.data_type).map_err(|e| {
                GateError::BadRequest(format!(
                    "cannot coerce column to {:?}: {e}",
                    target.data_type
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    RecordBatch::try_new(coerce_schema(&batch.schema(), targets), columns)
        .map_err(|e| GateError::Internal(format!("coerced batch rebuild failed: {e}")))
}
