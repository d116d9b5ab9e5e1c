//! Embedded DuckDB access for DuckGate.
//!
//! Architecture role:
//! - process-wide connection pool (cloned connections off one root database)
//! - Arrow execution with cancellation hooks and fetch-size slicing
//! - schema probing without execution (`DESCRIBE` mapping)
//! - metadata SQL builders and the Parquet ingest writer
//!
//! Every call into DuckDB blocks the calling thread; callers run these on
//! blocking tasks.

pub mod ingest;
pub mod metadata;
pub mod pool;
pub mod query;

pub use ingest::IngestWriter;
pub use pool::EnginePool;
pub use query::{describe_schema, query_batches, slice_batch};
