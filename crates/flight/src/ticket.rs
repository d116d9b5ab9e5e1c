//! Opaque ticket codec.
//!
//! Tickets are stateless: the payload carries everything a fetch needs (the
//! already-rewritten, already-sharded SQL or a prepared-statement handle)
//! plus the query id that names the running-query handle for cancellation.
//! The payload travels inside a standard `TicketStatementQuery` envelope so
//! the Flight SQL dispatcher routes every fetch through the statement path.

use arrow_flight::sql::{Any, ProstMessageExt, TicketStatementQuery};
use duckgate_common::{GateError, HandleId, QueryId, Result};
use prost::Message;
use serde::{Deserialize, Serialize};

/// What to execute when a client fetches a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TicketPayload {
    /// Run the carried SQL (a statement, a shard, or metadata SQL).
    Statement {
        /// Names the running-query handle a cancel can target.
        query_id: QueryId,
        /// Rewritten SQL to execute verbatim.
        sql: String,
    },
    /// Run the SQL stored under a prepared-statement handle.
    Prepared {
        /// Names the running-query handle a cancel can target.
        query_id: QueryId,
        /// Registry handle created by `createPreparedStatement`.
        handle: HandleId,
    },
}

impl TicketPayload {
    /// Id under which the fetch registers its running-query handle.
    pub fn query_id(&self) -> QueryId {
        match self {
            Self::Statement { query_id, .. } | Self::Prepared { query_id, .. } => *query_id,
        }
    }

    /// Encode into ticket bytes (a packed `TicketStatementQuery`).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(self)
            .map_err(|e| GateError::Internal(format!("ticket encode failed: {e}")))?;
        let envelope = TicketStatementQuery {
            statement_handle: body.into(),
        };
        Ok(envelope.as_any().encode_to_vec())
    }

    /// Decode from the `statement_handle` the dispatcher already unpacked.
    pub fn decode_statement_handle(handle: &[u8]) -> Result<Self> {
        serde_json::from_slice(handle)
            .map_err(|e| GateError::BadRequest(format!("malformed ticket: {e}")))
    }

    /// Decode from raw ticket bytes (used when walking a FlightInfo's
    /// endpoints for cancellation).
    pub fn decode_ticket(bytes: &[u8]) -> Result<Self> {
        let any = Any::decode(bytes)
            .map_err(|e| GateError::BadRequest(format!("malformed ticket: {e}")))?;
        let envelope: TicketStatementQuery = any
            .unpack()
            .map_err(|e| GateError::BadRequest(format!("malformed ticket: {e}")))?
            .ok_or_else(|| GateError::BadRequest("ticket is not a statement ticket".to_string()))?;
        Self::decode_statement_handle(&envelope.statement_handle)
    }
}
