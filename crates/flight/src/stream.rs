//! The producer side of a stream: execute on the engine inside a blocking
//! task, slice to the fetch-size hint, and hand batches to the Flight
//! encoder through a bounded channel so client backpressure suspends the
//! producer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow_flight::error::FlightError;
use duckdb::Connection;
use duckgate_common::{GateError, Result};
use duckgate_engine::slice_batch;
use tokio_stream::wrappers::ReceiverStream;

use crate::coerce::{self, TargetField};
use crate::registry::RunningGuard;
use crate::service::status_of;

/// Execute `sql` on `conn` and return the stream schema plus the batch
/// stream. The returned future resolves once the engine has produced the
/// result schema; execution errors before that point (including an
/// interrupt) surface here, later ones terminate the stream.
///
/// The connection, statement, and registry entry are released on every exit
/// path: the guard and connection live inside the blocking task and drop
/// when it returns, whether by exhaustion, error, cancel, or a client that
/// went away.
pub async fn run_query_stream(
    conn: Connection,
    sql: String,
    fetch_size: usize,
    cancelled: Arc<AtomicBool>,
    coercion: Option<Vec<TargetField>>,
    guard: RunningGuard,
) -> Result<(
    SchemaRef,
    ReceiverStream<std::result::Result<RecordBatch, FlightError>>,
)> {
    let (schema_tx, schema_rx) = tokio::sync::oneshot::channel::<Result<SchemaRef>>();
    let (batch_tx, batch_rx) =
        tokio::sync::mpsc::channel::<std::result::Result<RecordBatch, FlightError>>(4);

    tokio::task::spawn_blocking(move || {
        let _guard = guard;

        let mut stmt = match conn.prepare(&sql) {
            Ok(stmt) => stmt,
            Err(e) => {
                let _ = schema_tx.send(Err(GateError::Engine(e.to_string())));
                return;
            }
        };
        let arrow = match stmt.query_arrow([]) {
            Ok(arrow) => arrow,
            Err(e) => {
                let err = if cancelled.load(Ordering::Relaxed) {
                    GateError::Cancelled("query cancelled".to_string())
                } else {
                    GateError::Engine(e.to_string())
                };
                let _ = schema_tx.send(Err(err));
                return;
            }
        };

        let mut schema = arrow.get_schema();
        if let Some(targets) = &coercion {
            schema = coerce::coerce_schema(&schema, targets);
        }
        if schema_tx.send(Ok(schema)).is_err() {
            // Caller went away before the schema was ready.
            return;
        }

        for batch in arrow {
            if cancelled.load(Ordering::Relaxed) {
                let _ = batch_tx.blocking_send(Err(flight_error(GateError::Cancelled(
                    "query cancelled".to_string(),
                ))));
                return;
            }
            let batch = match &coercion {
                Some(targets) => match coerce::coerce_batch(&batch, targets) {
                    Ok(batch) => batch,
                    Err(e) => {
                        let _ = batch_tx.blocking_send(Err(flight_error(e)));
                        return;
                    }
                },
                None => batch,
            };
            for chunk in slice_batch(&batch, fetch_size) {
                if cancelled.load(Ordering::Relaxed) {
                    let _ = batch_tx.blocking_send(Err(flight_error(GateError::Cancelled(
                        "query cancelled".to_string(),
                    ))));
                    return;
                }
                if batch_tx.blocking_send(Ok(chunk)).is_err() {
                    // Client hung up; nothing left to do.
                    return;
                }
            }
        }
    });

    let schema = schema_rx
        .await
        .map_err(|_| GateError::Internal("query task ended before reporting a schema".to_string()))??;
    Ok((schema, ReceiverStream::new(batch_rx)))
}

/// Wrap a gateway error for transport inside a Flight data stream.
pub fn flight_error(err: GateError) -> FlightError {
    FlightError::Tonic(Box::new(status_of(err)))
}
