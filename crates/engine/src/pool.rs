//! Process-wide DuckDB connection pool.
//!
//! DuckDB connections are cheap to clone off a shared database instance and
//! each clone carries its own interrupt handle, so the pool keeps one root
//! connection and hands out clones. A clone sees the same catalogs as the
//! root, including anything `init_sql` attached at startup.

use std::sync::Mutex;

use duckdb::Connection;
use duckgate_common::{GateError, Result};

/// Map a DuckDB error into the gateway taxonomy.
pub fn engine_err(e: duckdb::Error) -> GateError {
    GateError::Engine(e.to_string())
}

/// Shared handle to the embedded database.
pub struct EnginePool {
    root: Mutex<Connection>,
}

impl EnginePool {
    /// Open an in-memory database and run the configured startup statements
    /// against it.
    pub fn open_in_memory(init_sql: &[String]) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(engine_err)?;
        for sql in init_sql {
            conn.execute_batch(sql).map_err(engine_err)?;
        }
        Ok(Self {
            root: Mutex::new(conn),
        })
    }

    /// A connection of this pool's database for one stream or RPC. The
    /// caller owns it for the duration of the work and drops it on every
    /// exit path.
    pub fn connection(&self) -> Result<Connection> {
        let root = self
            .root
            .lock()
            .map_err(|_| GateError::Internal("engine pool lock poisoned".to_string()))?;
        root.try_clone().map_err(engine_err)
    }

    /// Run statements against the root connection (startup/admin use).
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let root = self
            .root
            .lock()
            .map_err(|_| GateError::Internal("engine pool lock poisoned".to_string()))?;
        root.execute_batch(sql).map_err(engine_err)
    }
}
