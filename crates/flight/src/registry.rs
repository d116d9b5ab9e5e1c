//! Process-wide handle registry.
//!
//! Maps UUIDs to live state that outlives a single RPC: prepared statements
//! and executing queries. Cancellation is idempotent and may arrive before
//! the fetch starts; in that case a tombstone is left so the later fetch
//! fails with `Cancelled` instead of running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arrow::datatypes::SchemaRef;
use duckgate_common::{GateError, HandleId, QueryId, Result};
use uuid::Uuid;

/// Cancel hook invoked while the registry lock is held; must be cheap and
/// non-blocking (an engine interrupt, not a join).
pub type CancelHook = Box<dyn Fn() + Send + Sync>;

/// A prepared statement: rewritten SQL plus the schema probed at create.
#[derive(Clone)]
pub struct PreparedEntry {
    /// SQL after authorization rewriting; re-prepared at fetch time.
    pub sql: String,
    /// Result schema probed at create time.
    pub schema: SchemaRef,
    /// User that created the handle; lookups by anyone else fail.
    pub owner: String,
}

struct RunningEntry {
    owner: String,
    cancelled: Arc<AtomicBool>,
    cancel_hook: CancelHook,
}

enum Entry {
    Prepared(PreparedEntry),
    Running(RunningEntry),
    CancelTombstone,
}

/// Thread-safe UUID → entry map shared by every RPC.
#[derive(Default)]
pub struct HandleRegistry {
    entries: Mutex<HashMap<Uuid, Entry>>,
}

/// Removes the running-query entry on every exit path of a stream.
pub struct RunningGuard {
    registry: Arc<HandleRegistry>,
    id: QueryId,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.registry.remove_running(self.id);
    }
}

impl HandleRegistry {
    /// Fresh empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a prepared statement under a fresh handle id.
    pub fn insert_prepared(&self, entry: PreparedEntry) -> HandleId {
        let id = HandleId::new();
        self.lock().insert(id.0, Entry::Prepared(entry));
        id
    }

    /// Look up a prepared statement, verifying the requester owns it.
    pub fn get_prepared(&self, id: HandleId, user: &str) -> Result<PreparedEntry> {
        let entries = self.lock();
        match entries.get(&id.0) {
            Some(Entry::Prepared(entry)) => {
                if entry.owner == user {
                    Ok(entry.clone())
                } else {
                    Err(GateError::Unauthorized(format!(
                        "prepared statement {id} belongs to another user"
                    )))
                }
            }
            _ => Err(GateError::BadRequest(format!(
                "unknown prepared statement: {id}"
            ))),
        }
    }

    /// Dispose a prepared statement, verifying ownership.
    pub fn remove_prepared(&self, id: HandleId, user: &str) -> Result<()> {
        let mut entries = self.lock();
        match entries.get(&id.0) {
            Some(Entry::Prepared(entry)) if entry.owner != user => {
                Err(GateError::Unauthorized(format!(
                    "prepared statement {id} belongs to another user"
                )))
            }
            Some(Entry::Prepared(_)) => {
                entries.remove(&id.0);
                Ok(())
            }
            _ => Err(GateError::BadRequest(format!(
                "unknown prepared statement: {id}"
            ))),
        }
    }

    /// Register an executing query. Fails with `Cancelled` when a cancel
    /// already arrived for this id. Returns the cancelled flag the producer
    /// polls between batches and a guard that removes the entry on drop.
    pub fn register_running(
        self: &Arc<Self>,
        id: QueryId,
        owner: &str,
        cancel_hook: CancelHook,
    ) -> Result<(Arc<AtomicBool>, RunningGuard)> {
        let mut entries = self.lock();
        match entries.get(&id.0) {
            Some(Entry::CancelTombstone) => {
                entries.remove(&id.0);
                return Err(GateError::Cancelled(format!("query {id} was cancelled")));
            }
            Some(_) => {
                return Err(GateError::Internal(format!(
                    "query id already registered: {id}"
                )))
            }
            None => {}
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        entries.insert(
            id.0,
            Entry::Running(RunningEntry {
                owner: owner.to_string(),
                cancelled: Arc::clone(&cancelled),
                cancel_hook,
            }),
        );
        Ok((
            cancelled,
            RunningGuard {
                registry: Arc::clone(self),
                id,
            },
        ))
    }

    /// Cancel a query by id. Idempotent: cancelling a finished or already
    /// cancelled query succeeds; cancelling an id that has not started yet
    /// leaves a tombstone the later fetch trips over. Cancelling another
    /// user's running query is an authorization failure.
    pub fn cancel(&self, id: QueryId, user: &str) -> Result<()> {
        let mut entries = self.lock();
        match entries.get(&id.0) {
            Some(Entry::Running(running)) => {
                if running.owner != user {
                    return Err(GateError::Unauthorized(format!(
                        "query {id} belongs to another user"
                    )));
                }
                running.cancelled.store(true, Ordering::Relaxed);
                (running.cancel_hook)();
                Ok(())
            }
            Some(Entry::CancelTombstone) => Ok(()),
            Some(Entry::Prepared(_)) => Err(GateError::BadRequest(format!(
                "handle {id} is not a running query"
            ))),
            None => {
                entries.insert(id.0, Entry::CancelTombstone);
                Ok(())
            }
        }
    }

    fn remove_running(&self, id: QueryId) {
        let mut entries = self.lock();
        if matches!(entries.get(&id.0), Some(Entry::Running(_))) {
            entries.remove(&id.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::Schema;

    fn prepared(owner: &str) -> PreparedEntry {
        PreparedEntry {
            sql: "SELECT 1".to_string(),
            schema: Arc::new(Schema::empty()),
            owner: owner.to_string(),
        }
    }

    #[test]
    fn prepared_lifecycle_with_owner_checks() {
        let registry = HandleRegistry::new();
        let id = registry.insert_prepared(prepared("admin"));

        assert_eq!(registry.get_prepared(id, "admin").expect("get").sql, "SELECT 1");
        assert!(matches!(
            registry.get_prepared(id, "mallory"),
            Err(GateError::Unauthorized(_))
        ));
        assert!(matches!(
            registry.remove_prepared(id, "mallory"),
            Err(GateError::Unauthorized(_))
        ));

        registry.remove_prepared(id, "admin").expect("remove");
        assert!(matches!(
            registry.get_prepared(id, "admin"),
            Err(GateError::BadRequest(_))
        ));
    }

    #[test]
    fn cancel_flags_running_queries_and_fires_the_hook() {
        let registry = Arc::new(HandleRegistry::new());
        let id = QueryId::new();
        let fired = Arc::new(AtomicBool::new(false));
        let hook_fired = Arc::clone(&fired);

        let (cancelled, guard) = registry
            .register_running(id, "admin", Box::new(move || hook_fired.store(true, Ordering::Relaxed)))
            .expect("register");
        assert!(!cancelled.load(Ordering::Relaxed));

        registry.cancel(id, "admin").expect("cancel");
        assert!(cancelled.load(Ordering::Relaxed));
        assert!(fired.load(Ordering::Relaxed));

        // Idempotent while running, and a no-op after the stream ends.
        registry.cancel(id, "admin").expect("cancel again");
        drop(guard);
        registry.cancel(id, "admin").expect("cancel after removal");
    }

    #[test]
    fn cancel_before_fetch_leaves_a_tombstone() {
        let registry = Arc::new(HandleRegistry::new());
        let id = QueryId::new();

        registry.cancel(id, "admin").expect("tombstone");
        let err = registry
            .register_running(id, "admin", Box::new(|| {}))
            .expect_err("tombstoned");
        assert!(matches!(err, GateError::Cancelled(_)));

        // The tombstone is consumed; a new registration under the same id
        // would be a fresh query.
        let (_flag, _guard) = registry
            .register_running(id, "admin", Box::new(|| {}))
            .expect("register after consume");
    }

    #[test]
    fn cross_user_cancel_is_unauthorized() {
        let registry = Arc::new(HandleRegistry::new());
        let id = QueryId::new();
        let (_flag, _guard) = registry
            .register_running(id, "admin", Box::new(|| {}))
            .expect("register");
        assert!(matches!(
            registry.cancel(id, "mallory"),
            Err(GateError::Unauthorized(_))
        ));
    }

    #[test]
    fn guard_drop_releases_the_entry() {
        let registry = Arc::new(HandleRegistry::new());
        let id = QueryId::new();
        {
            let (_flag, _guard) = registry
                .register_running(id, "admin", Box::new(|| {}))
                .expect("register");
        }
        // Entry gone: a new registration is accepted.
        let (_flag, _guard) = registry
            .register_running(id, "admin", Box::new(|| {}))
            .expect("register again");
    }
}
