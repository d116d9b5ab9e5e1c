#![deny(missing_docs)]

//! Shared configuration, error types, ids, and header contracts for DuckGate crates.
//!
//! Architecture role:
//! - defines the server configuration passed across layers
//! - provides the common [`GateError`] / [`Result`] contracts
//! - names the Flight call headers the producer understands
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`headers`]
//! - [`ids`]

/// Server configuration types and file loading.
pub mod config;
/// Shared error taxonomy.
pub mod error;
/// Flight call header names and parsing helpers.
pub mod headers;
/// Strongly-typed identifier wrappers.
pub mod ids;

pub use config::{AccessMode, AccessRule, ObjectKind, ServerConfig, UserCredential};
pub use error::{GateError, Result};
pub use ids::{HandleId, QueryId};
