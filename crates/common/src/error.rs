use thiserror::Error;

/// Canonical DuckGate error taxonomy used across crates.
///
/// Classification guidance:
/// - [`GateError::Unauthenticated`]: missing or invalid credentials/JWT
/// - [`GateError::Unauthorized`]: a valid caller that policy denies
/// - [`GateError::BadRequest`]: unparseable SQL, unknown handle, invalid header
/// - [`GateError::NotFound`]: missing path, table, or Delta log
/// - [`GateError::Conflict`]: ingest target already exists
/// - [`GateError::Cancelled`]: explicit cancellation observed
/// - [`GateError::Engine`]: any failure signaled by the embedded engine
/// - [`GateError::Internal`]: invariant violations inside the gateway
/// - [`GateError::Io`]: raw filesystem IO failures from std APIs
#[derive(Debug, Error)]
pub enum GateError {
    /// Missing or invalid credentials.
    ///
    /// Examples:
    /// - no `authorization` header on a call that requires one
    /// - JWT signature mismatch or expired token
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The caller is known but the policy store denies the object.
    ///
    /// Examples:
    /// - no access row matches a referenced table or path
    /// - a handle owned by a different user
    /// - the remote resolve endpoint failed (deny, never allow)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The request itself is malformed.
    ///
    /// Examples:
    /// - SQL that does not parse
    /// - a non-numeric `fetch-size` header
    /// - a ticket payload that does not decode
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A referenced path or table does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation would overwrite existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The operation was cancelled by an explicit request.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The embedded engine reported a failure; never retried server-side.
    #[error("engine failure: {0}")]
    Engine(String),

    /// A gateway invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Standard DuckGate result alias.
pub type Result<T> = std::result::Result<T, GateError>;
