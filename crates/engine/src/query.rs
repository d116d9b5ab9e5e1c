//! Arrow execution helpers and engine-free schema probing.

use std::sync::Arc;

use arrow::array::StringArray;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use duckdb::Connection;
use duckgate_common::{GateError, Result};

use crate::pool::engine_err;

/// Execute `sql` and collect every batch. Used for metadata queries and
/// tests; streaming paths drive the statement themselves so they can check
/// cancellation between batches.
pub fn query_batches(conn: &Connection, sql: &str) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let mut stmt = conn.prepare(sql).map_err(engine_err)?;
    let arrow = stmt.query_arrow([]).map_err(engine_err)?;
    let schema = arrow.get_schema();
    let batches: Vec<RecordBatch> = arrow.collect();
    Ok((schema, batches))
}

/// Result schema of `sql` without executing it, via `DESCRIBE` and a type
/// name mapping. Binder errors surface here, which callers may choose to
/// defer until fetch time.
pub fn describe_schema(conn: &Connection, sql: &str) -> Result<SchemaRef> {
    let (_, batches) = query_batches(conn, &format!("DESCRIBE {sql}"))?;
    let mut fields = Vec::new();
    for batch in &batches {
        let names = string_column(batch, 0)?;
        let types = string_column(batch, 1)?;
        for row in 0..batch.num_rows() {
            let name = names.value(row).to_string();
            let type_name = types.value(row);
            fields.push(Field::new(name, arrow_type_of(type_name), true));
        }
    }
    Ok(Arc::new(Schema::new(fields)))
}

fn string_column<'a>(batch: &'a RecordBatch, index: usize) -> Result<&'a StringArray> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| GateError::Internal("DESCRIBE returned a non-string column".to_string()))
}

/// Map a DuckDB type name to the Arrow type its Arrow export produces.
/// Unrecognized names fall back to `Utf8`; the authoritative schema is the
/// one on the data stream itself.
fn arrow_type_of(type_name: &str) -> DataType {
    let upper = type_name.trim().to_ascii_uppercase();
    if let Some(rest) = upper.strip_prefix("DECIMAL") {
        let (precision, scale) = parse_decimal(rest).unwrap_or((18, 3));
        return DataType::Decimal128(precision, scale);
    }
    match upper.as_str() {
        "BIGINT" | "INT8" | "LONG" => DataType::Int64,
        "INTEGER" | "INT" | "INT4" => DataType::Int32,
        "SMALLINT" | "INT2" => DataType::Int16,
        "TINYINT" | "INT1" => DataType::Int8,
        "UBIGINT" => DataType::UInt64,
        "UINTEGER" => DataType::UInt32,
        "USMALLINT" => DataType::UInt16,
        "UTINYINT" => DataType::UInt8,
        "HUGEINT" => DataType::Decimal128(38, 0),
        "FLOAT" | "REAL" | "FLOAT4" => DataType::Float32,
        "DOUBLE" | "FLOAT8" => DataType::Float64,
        "BOOLEAN" | "BOOL" => DataType::Boolean,
        "DATE" => DataType::Date32,
        "TIME" => DataType::Time64(TimeUnit::Microsecond),
        "TIMESTAMP" | "DATETIME" => DataType::Timestamp(TimeUnit::Microsecond, None),
        "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => {
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
        }
        "BLOB" | "BYTEA" => DataType::Binary,
        _ => DataType::Utf8,
    }
}

fn parse_decimal(rest: &str) -> Option<(u8, i8)> {
    let inner = rest.trim().strip_prefix('(')?.strip_suffix(')')?;
    let (p, s) = inner.split_once(',')?;
    Some((p.trim().parse().ok()?, s.trim().parse().ok()?))
}

/// Split a batch into zero-copy slices of at most `max_rows` rows.
pub fn slice_batch(batch: &RecordBatch, max_rows: usize) -> Vec<RecordBatch> {
    let rows = batch.num_rows();
    if rows <= max_rows {
        return vec![batch.clone()];
    }
    let mut out = Vec::with_capacity(rows.div_ceil(max_rows));
    let mut offset = 0;
    while offset < rows {
        let len = max_rows.min(rows - offset);
        out.push(batch.slice(offset, len));
        offset += len;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;

    fn conn() -> Connection {
        Connection::open_in_memory().expect("duckdb")
    }

    #[test]
    fn describe_maps_generate_series_to_int64() {
        let schema = describe_schema(&conn(), "SELECT * FROM generate_series(10)").expect("schema");
        assert_eq!(schema.fields().len(), 1);
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
    }

    #[test]
    fn describe_surfaces_binder_errors() {
        assert!(describe_schema(&conn(), "SELECT x FROM generate_series(10)").is_err());
    }

    #[test]
    fn query_batches_returns_rows() {
        let (schema, batches) = query_batches(&conn(), "SELECT * FROM generate_series(10)")
            .expect("query");
        assert_eq!(schema.fields().len(), 1);
        let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
        assert_eq!(rows, 11);
    }

    #[test]
    fn slice_batch_obeys_the_fetch_size_law() {
        let values: Vec<i64> = (0..101).collect();
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))])
            .expect("batch");

        let slices = slice_batch(&batch, 10);
        assert_eq!(slices.len(), 11);
        assert!(slices[..10].iter().all(|s| s.num_rows() == 10));
        assert_eq!(slices[10].num_rows(), 1);

        let slices = slice_batch(&batch, 200);
        assert_eq!(slices.len(), 1);
    }

    #[test]
    fn decimal_names_parse_with_precision_and_scale() {
        assert_eq!(arrow_type_of("DECIMAL(12,4)"), DataType::Decimal128(12, 4));
        assert_eq!(arrow_type_of("VARCHAR"), DataType::Utf8);
        assert_eq!(arrow_type_of("something_custom"), DataType::Utf8);
    }
}
