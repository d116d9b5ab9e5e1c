//! Server wiring: bind the producer onto a tonic transport.

use std::net::SocketAddr;
use std::sync::Arc;

use arrow_flight::flight_service_server::FlightServiceServer;
use duckgate_common::{GateError, Result, ServerConfig};

use crate::service::{DuckGateFlightSqlService, GateState};

/// Run the Flight SQL server until the transport shuts down. Binds
/// `0.0.0.0:{config.port}`; bind failures surface as errors so the hosting
/// binary can exit non-zero.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let port = config.port;
    let state = Arc::new(GateState::new(config)?);
    let service = DuckGateFlightSqlService::new(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "duckgate flight sql server listening");

    tonic::transport::Server::builder()
        .add_service(FlightServiceServer::new(service))
        .serve(addr)
        .await
        .map_err(|e| GateError::Internal(format!("server terminated: {e}")))
}
