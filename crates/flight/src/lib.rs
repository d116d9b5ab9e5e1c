//! Arrow Flight SQL producer for DuckGate.
//!
//! Architecture role:
//! - request dispatch: headers → identity → authorizer → planner → engine
//! - opaque ticket codec and the process-wide handle registry
//! - batch streaming with fetch-size slicing and cooperative cancellation
//! - server wiring and the hosting binary
//!
//! Key modules:
//! - [`service`]
//! - [`registry`]
//! - [`ticket`]
//! - [`stream`]
//! - [`coerce`]
//! - [`server`]

pub mod coerce;
pub mod registry;
pub mod server;
pub mod service;
pub mod stream;
pub mod ticket;

pub use registry::{HandleRegistry, PreparedEntry};
pub use server::serve;
pub use service::{DuckGateFlightSqlService, GateState};
pub use ticket::TicketPayload;
