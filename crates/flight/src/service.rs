//! The Flight SQL dispatcher: headers → identity → authorizer → planner →
//! engine → result stream.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use arrow::datatypes::Schema;
use arrow::ipc::writer::IpcWriteOptions;
use arrow_flight::decode::FlightRecordBatchStream;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::error::FlightError;
use arrow_flight::flight_service_server::FlightService;
use arrow_flight::sql::server::{FlightSqlService, PeekableFlightDataStream};
use arrow_flight::sql::{
    ActionClosePreparedStatementRequest, ActionCreatePreparedStatementRequest,
    ActionCreatePreparedStatementResult, CommandGetCatalogs, CommandGetDbSchemas,
    CommandGetTables, CommandPreparedStatementQuery, CommandStatementIngest,
    CommandStatementQuery, SqlInfo, TicketStatementQuery,
};
use arrow_flight::{
    Action, CancelFlightInfoRequest, CancelFlightInfoResult, CancelStatus, FlightDescriptor,
    FlightEndpoint, FlightInfo, HandshakeRequest, HandshakeResponse, IpcMessage, SchemaAsIpc,
    Ticket,
};
use base64::Engine as _;
use futures::{Stream, StreamExt, TryStreamExt};
use sqlparser::ast::Statement;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status, Streaming};

use duckgate_auth::identity::{CLAIM_BEARER_TOKEN, CLAIM_TOKEN_TYPE};
use duckgate_auth::{
    authorize, issue_token, verify_token, Identity, PasswordValidator, RemotePolicyStore,
    StaticPolicyStore,
};
use duckgate_common::headers::{
    self, DEFAULT_SPLIT_SIZE, HEADER_DATABASE, HEADER_DATA_SCHEMA, HEADER_FETCH_SIZE,
    HEADER_PARALLELIZE, HEADER_SCHEMA, HEADER_SPLIT_SIZE,
};
use duckgate_common::{AccessMode, GateError, QueryId, Result, ServerConfig};
use duckgate_engine::{describe_schema, metadata as metadata_sql, EnginePool, IngestWriter};
use duckgate_sql::{first_statement, parse_sql, with_updated_database_schema, HiveSpec};
use duckgate_split::plan_splits;

use crate::coerce::{parse_data_schema, TargetField};
use crate::registry::{HandleRegistry, PreparedEntry};
use crate::stream::run_query_stream;
use crate::ticket::TicketPayload;

/// Map a gateway error onto its Flight status code.
pub fn status_of(err: GateError) -> Status {
    match err {
        GateError::Unauthenticated(m) => Status::unauthenticated(m),
        GateError::Unauthorized(m) => Status::permission_denied(m),
        GateError::BadRequest(m) => Status::invalid_argument(m),
        GateError::NotFound(m) => Status::not_found(m),
        GateError::Conflict(m) => Status::already_exists(m),
        GateError::Cancelled(m) => Status::cancelled(m),
        GateError::Engine(m) => Status::internal(m),
        GateError::Internal(m) => Status::internal(m),
        GateError::Io(e) => Status::internal(e.to_string()),
    }
}

fn flight_error_to_status(err: FlightError) -> Status {
    match err {
        FlightError::Tonic(status) => *status,
        other => Status::internal(other.to_string()),
    }
}

/// Process-wide state shared by every RPC.
pub struct GateState {
    /// Immutable server configuration.
    pub config: ServerConfig,
    /// Engine connection pool.
    pub pool: EnginePool,
    /// Prepared-statement and running-query handles.
    pub registry: Arc<HandleRegistry>,
    validator: PasswordValidator,
    secret: String,
    static_policy: StaticPolicyStore,
    remote_policy: Option<RemotePolicyStore>,
}

impl GateState {
    /// Open the engine and build the auth stores from configuration. A
    /// missing `jwt-secret` gets a per-run random one.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let pool = EnginePool::open_in_memory(&config.init_sql)?;
        let validator = PasswordValidator::from_users(&config.users);
        let secret = config
            .jwt_secret
            .clone()
            .unwrap_or_else(duckgate_auth::validator::generate_random_secret);
        let static_policy = StaticPolicyStore::new(config.access_rules.clone());
        let remote_policy = config.resolve_url().map(RemotePolicyStore::new);
        Ok(Self {
            config,
            pool,
            registry: Arc::new(HandleRegistry::new()),
            validator,
            secret,
            static_policy,
            remote_policy,
        })
    }

    /// The signing secret in use (configured or per-run).
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

/// The Flight SQL producer.
#[derive(Clone)]
pub struct DuckGateFlightSqlService {
    state: Arc<GateState>,
}

fn header_str<'a>(md: &'a MetadataMap, key: &str) -> Option<&'a str> {
    md.get(key).and_then(|v| v.to_str().ok())
}

impl DuckGateFlightSqlService {
    /// Service over shared state.
    pub fn new(state: Arc<GateState>) -> Self {
        Self { state }
    }

    fn authenticate(&self, md: &MetadataMap) -> Result<Identity> {
        let raw = header_str(md, "authorization")
            .ok_or_else(|| GateError::Unauthenticated("missing authorization header".to_string()))?;
        let token = raw
            .strip_prefix("Bearer ")
            .or_else(|| raw.strip_prefix("bearer "))
            .ok_or_else(|| GateError::Unauthenticated("expected a bearer token".to_string()))?;
        let claims = verify_token(token, &self.state.secret)?;

        let mut verified_claims = BTreeMap::new();
        verified_claims.insert(CLAIM_BEARER_TOKEN.to_string(), token.to_string());
        if let Some(token_type) = &claims.token_type {
            verified_claims.insert(CLAIM_TOKEN_TYPE.to_string(), token_type.clone());
        }
        Ok(Identity {
            groups: self.state.config.groups_of(&claims.sub).into_iter().collect(),
            user: claims.sub,
            verified_claims,
        })
    }

    fn default_database(&self, md: &MetadataMap) -> String {
        header_str(md, HEADER_DATABASE)
            .map(str::to_string)
            .unwrap_or_else(|| self.state.config.database.clone())
    }

    fn default_schema(&self, md: &MetadataMap) -> String {
        header_str(md, HEADER_SCHEMA)
            .map(str::to_string)
            .unwrap_or_else(|| self.state.config.schema.clone())
    }

    /// Parse and, depending on the access mode, authorize-and-rewrite a SQL
    /// statement for this caller.
    async fn authorize_sql(
        &self,
        identity: &Identity,
        md: &MetadataMap,
        sql: &str,
    ) -> Result<Statement> {
        let database = self.default_database(md);
        let schema = self.default_schema(md);
        let mut statement = first_statement(parse_sql(sql)?)?;

        match self.state.config.access_mode {
            AccessMode::Complete => {
                if matches!(statement, Statement::Query(_)) {
                    with_updated_database_schema(&mut statement, &database, &schema)?;
                }
            }
            AccessMode::Restricted => {
                let prober = |path: &str| -> Option<HiveSpec> { duckgate_split::infer_hive_spec(path) };
                match (identity.is_redirect(), &self.state.remote_policy) {
                    (true, Some(remote)) => {
                        authorize(identity, &database, &schema, &mut statement, remote, &prober)
                            .await?
                    }
                    (true, None) => {
                        return Err(GateError::Unauthorized(
                            "redirect authorization requested but login-url is not configured"
                                .to_string(),
                        ))
                    }
                    (false, _) => {
                        authorize(
                            identity,
                            &database,
                            &schema,
                            &mut statement,
                            &self.state.static_policy,
                            &prober,
                        )
                        .await?
                    }
                }
            }
        }
        Ok(statement)
    }

    /// Build a FlightInfo with one endpoint per shard SQL. The dataset
    /// schema comes from a `DESCRIBE` probe of the first shard; probe
    /// failures defer to fetch time with an empty schema.
    async fn statement_flight_info(
        &self,
        descriptor: FlightDescriptor,
        shards: Vec<String>,
    ) -> std::result::Result<Response<FlightInfo>, Status> {
        let schema = match shards.first() {
            Some(sql) => {
                let conn = self.state.pool.connection().map_err(status_of)?;
                let probe_sql = sql.clone();
                tokio::task::spawn_blocking(move || describe_schema(&conn, &probe_sql))
                    .await
                    .map_err(|e| Status::internal(format!("schema probe task failed: {e}")))?
                    .unwrap_or_else(|e| {
                        tracing::debug!(error = %e, "schema probe failed, deferring to fetch");
                        Arc::new(Schema::empty())
                    })
            }
            None => Arc::new(Schema::empty()),
        };

        let mut info = FlightInfo::new()
            .try_with_schema(&schema)
            .map_err(|e| Status::internal(format!("failed to encode schema: {e}")))?
            .with_descriptor(descriptor)
            .with_total_records(-1);
        for sql in shards {
            let payload = TicketPayload::Statement {
                query_id: QueryId::new(),
                sql,
            };
            let ticket = Ticket::new(payload.encode().map_err(status_of)?);
            info = info.with_endpoint(FlightEndpoint::new().with_ticket(ticket));
        }
        Ok(Response::new(info))
    }

    /// Probe a statement's schema best-effort (prepared-statement create).
    async fn probe_schema(&self, sql: &str) -> Result<arrow::datatypes::SchemaRef> {
        let conn = self.state.pool.connection()?;
        let sql = sql.to_string();
        let probed = tokio::task::spawn_blocking(move || describe_schema(&conn, &sql))
            .await
            .map_err(|e| GateError::Internal(format!("schema probe task failed: {e}")))?;
        Ok(probed.unwrap_or_else(|e| {
            tracing::debug!(error = %e, "schema probe failed, deferring to fetch");
            Arc::new(Schema::empty())
        }))
    }
}

#[tonic::async_trait]
impl FlightSqlService for DuckGateFlightSqlService {
    type FlightService = DuckGateFlightSqlService;

    async fn do_handshake(
        &self,
        request: Request<Streaming<HandshakeRequest>>,
    ) -> std::result::Result<
        Response<Pin<Box<dyn Stream<Item = std::result::Result<HandshakeResponse, Status>> + Send>>>,
        Status,
    > {
        let md = request.metadata();
        let raw = header_str(md, "authorization")
            .ok_or_else(|| Status::unauthenticated("missing authorization header"))?;
        let encoded = raw
            .strip_prefix("Basic ")
            .ok_or_else(|| Status::unauthenticated("expected basic credentials"))?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| Status::unauthenticated("malformed basic credentials"))?;
        let text = String::from_utf8(decoded)
            .map_err(|_| Status::unauthenticated("malformed basic credentials"))?;
        let (user, password) = text
            .split_once(':')
            .ok_or_else(|| Status::unauthenticated("malformed basic credentials"))?;

        self.state.validator.validate(user, password).map_err(status_of)?;
        let token = issue_token(user, &self.state.secret, None).map_err(status_of)?;
        tracing::info!(user, "handshake authenticated");

        let result = HandshakeResponse {
            protocol_version: 0,
            payload: token.clone().into_bytes().into(),
        };
        let stream = futures::stream::iter(vec![Ok(result)]);
        let mut response: Response<
            Pin<Box<dyn Stream<Item = std::result::Result<HandshakeResponse, Status>> + Send>>,
        > = Response::new(Box::pin(stream));
        let bearer = format!("Bearer {token}")
            .parse()
            .map_err(|_| Status::internal("token is not valid header material"))?;
        response.metadata_mut().insert("authorization", bearer);
        Ok(response)
    }

    async fn get_flight_info_statement(
        &self,
        query: CommandStatementQuery,
        request: Request<FlightDescriptor>,
    ) -> std::result::Result<Response<FlightInfo>, Status> {
        let md = request.metadata();
        let identity = self.authenticate(md).map_err(status_of)?;
        let statement = self
            .authorize_sql(&identity, md, &query.query)
            .await
            .map_err(status_of)?;

        let shards: Vec<String> = if headers::is_true(header_str(md, HEADER_PARALLELIZE)) {
            let split_size = headers::positive_usize(
                HEADER_SPLIT_SIZE,
                header_str(md, HEADER_SPLIT_SIZE),
                DEFAULT_SPLIT_SIZE,
            )
            .map_err(status_of)?;
            match plan_splits(&statement, split_size).map_err(status_of)? {
                Some(shards) => shards.iter().map(ToString::to_string).collect(),
                None => vec![statement.to_string()],
            }
        } else {
            vec![statement.to_string()]
        };

        tracing::info!(
            user = %identity.user,
            endpoints = shards.len(),
            "statement planned"
        );
        let descriptor = request.into_inner();
        self.statement_flight_info(descriptor, shards).await
    }

    async fn do_get_statement(
        &self,
        ticket: TicketStatementQuery,
        request: Request<Ticket>,
    ) -> std::result::Result<Response<<Self as FlightService>::DoGetStream>, Status> {
        let md = request.metadata();
        let identity = self.authenticate(md).map_err(status_of)?;
        let payload =
            TicketPayload::decode_statement_handle(&ticket.statement_handle).map_err(status_of)?;

        let (query_id, sql) = match payload {
            TicketPayload::Statement { query_id, sql } => (query_id, sql),
            TicketPayload::Prepared { query_id, handle } => {
                let entry = self
                    .state
                    .registry
                    .get_prepared(handle, &identity.user)
                    .map_err(status_of)?;
                (query_id, entry.sql)
            }
        };

        let fetch_size = headers::positive_usize(
            HEADER_FETCH_SIZE,
            header_str(md, HEADER_FETCH_SIZE),
            self.state.config.fetch_size,
        )
        .map_err(status_of)?;
        let coercion: Option<Vec<TargetField>> = match header_str(md, HEADER_DATA_SCHEMA) {
            Some(header) => Some(parse_data_schema(header).map_err(status_of)?),
            None => None,
        };

        let conn = self.state.pool.connection().map_err(status_of)?;
        let interrupt = conn.interrupt_handle();
        let (cancelled, guard) = self
            .state
            .registry
            .register_running(query_id, &identity.user, Box::new(move || interrupt.interrupt()))
            .map_err(status_of)?;

        tracing::debug!(user = %identity.user, %query_id, fetch_size, "stream starting");
        let (schema, batches) =
            run_query_stream(conn, sql, fetch_size, cancelled, coercion, guard)
                .await
                .map_err(status_of)?;

        let stream = FlightDataEncoderBuilder::new()
            .with_schema(schema)
            .build(batches)
            .map(|item| item.map_err(flight_error_to_status));
        Ok(Response::new(Box::pin(stream)))
    }

    async fn do_action_create_prepared_statement(
        &self,
        query: ActionCreatePreparedStatementRequest,
        request: Request<Action>,
    ) -> std::result::Result<ActionCreatePreparedStatementResult, Status> {
        let md = request.metadata();
        let identity = self.authenticate(md).map_err(status_of)?;
        let statement = self
            .authorize_sql(&identity, md, &query.query)
            .await
            .map_err(status_of)?;
        let sql = statement.to_string();
        let schema = self.probe_schema(&sql).await.map_err(status_of)?;

        let handle = self.state.registry.insert_prepared(PreparedEntry {
            sql,
            schema: Arc::clone(&schema),
            owner: identity.user.clone(),
        });
        tracing::info!(user = %identity.user, %handle, "prepared statement created");

        let options = IpcWriteOptions::default();
        let dataset_schema = IpcMessage::try_from(SchemaAsIpc::new(&schema, &options))
            .map_err(|e| Status::internal(format!("schema conversion failed: {e}")))?;
        let empty = Schema::empty();
        let parameter_schema = IpcMessage::try_from(SchemaAsIpc::new(&empty, &options))
            .map_err(|e| Status::internal(format!("schema conversion failed: {e}")))?;

        Ok(ActionCreatePreparedStatementResult {
            prepared_statement_handle: handle.to_string().into_bytes().into(),
            dataset_schema: dataset_schema.0,
            parameter_schema: parameter_schema.0,
        })
    }

    async fn get_flight_info_prepared_statement(
        &self,
        cmd: CommandPreparedStatementQuery,
        request: Request<FlightDescriptor>,
    ) -> std::result::Result<Response<FlightInfo>, Status> {
        let md = request.metadata();
        let identity = self.authenticate(md).map_err(status_of)?;
        let handle = duckgate_common::HandleId::parse(&cmd.prepared_statement_handle)
            .ok_or_else(|| Status::invalid_argument("malformed prepared statement handle"))?;
        let entry = self
            .state
            .registry
            .get_prepared(handle, &identity.user)
            .map_err(status_of)?;

        let payload = TicketPayload::Prepared {
            query_id: QueryId::new(),
            handle,
        };
        let ticket = Ticket::new(payload.encode().map_err(status_of)?);
        let info = FlightInfo::new()
            .try_with_schema(&entry.schema)
            .map_err(|e| Status::internal(format!("failed to encode schema: {e}")))?
            .with_descriptor(request.into_inner())
            .with_endpoint(FlightEndpoint::new().with_ticket(ticket))
            .with_total_records(-1);
        Ok(Response::new(info))
    }

    async fn do_action_close_prepared_statement(
        &self,
        query: ActionClosePreparedStatementRequest,
        request: Request<Action>,
    ) -> std::result::Result<(), Status> {
        let identity = self.authenticate(request.metadata()).map_err(status_of)?;
        let handle = duckgate_common::HandleId::parse(&query.prepared_statement_handle)
            .ok_or_else(|| Status::invalid_argument("malformed prepared statement handle"))?;
        self.state
            .registry
            .remove_prepared(handle, &identity.user)
            .map_err(status_of)?;
        tracing::info!(user = %identity.user, %handle, "prepared statement closed");
        Ok(())
    }

    async fn do_action_cancel_flight_info(
        &self,
        query: CancelFlightInfoRequest,
        request: Request<Action>,
    ) -> std::result::Result<CancelFlightInfoResult, Status> {
        let identity = self.authenticate(request.metadata()).map_err(status_of)?;
        let info = query
            .info
            .ok_or_else(|| Status::invalid_argument("cancel request carries no flight info"))?;

        for endpoint in &info.endpoint {
            let Some(ticket) = &endpoint.ticket else {
                continue;
            };
            let Ok(payload) = TicketPayload::decode_ticket(&ticket.ticket) else {
                continue;
            };
            self.state
                .registry
                .cancel(payload.query_id(), &identity.user)
                .map_err(status_of)?;
            tracing::info!(user = %identity.user, query_id = %payload.query_id(), "cancel requested");
        }
        Ok(CancelFlightInfoResult {
            status: CancelStatus::Cancelled as i32,
        })
    }

    async fn do_put_statement_ingest(
        &self,
        ticket: CommandStatementIngest,
        request: Request<PeekableFlightDataStream>,
    ) -> std::result::Result<i64, Status> {
        let md = request.metadata();
        let identity = self.authenticate(md).map_err(status_of)?;
        let relative_path = ticket
            .options
            .get("path")
            .cloned()
            .ok_or_else(|| Status::invalid_argument("ingest requires options[\"path\"]"))?;

        let stream = request.into_inner();
        let mut decoder =
            FlightRecordBatchStream::new_from_flight_data(stream.map_err(FlightError::from));
        let mut batches = Vec::new();
        while let Some(batch) = decoder
            .try_next()
            .await
            .map_err(|e| Status::invalid_argument(format!("malformed ingest stream: {e}")))?
        {
            batches.push(batch);
        }
        let schema = match batches.first() {
            Some(batch) => batch.schema(),
            None => decoder
                .schema()
                .cloned()
                .ok_or_else(|| Status::invalid_argument("ingest stream carried no schema"))?,
        };

        let warehouse = PathBuf::from(&self.state.config.warehouse_path);
        let rows = tokio::task::spawn_blocking(move || -> Result<u64> {
            let mut writer = IngestWriter::create(&warehouse, &relative_path, schema)?;
            for batch in &batches {
                writer.write(batch)?;
            }
            writer.finish()
        })
        .await
        .map_err(|e| Status::internal(format!("ingest task failed: {e}")))?
        .map_err(status_of)?;

        tracing::info!(user = %identity.user, rows, "ingest complete");
        Ok(rows as i64)
    }

    async fn get_flight_info_catalogs(
        &self,
        _query: CommandGetCatalogs,
        request: Request<FlightDescriptor>,
    ) -> std::result::Result<Response<FlightInfo>, Status> {
        self.authenticate(request.metadata()).map_err(status_of)?;
        let sql = metadata_sql::catalogs_sql();
        self.statement_flight_info(request.into_inner(), vec![sql]).await
    }

    async fn get_flight_info_schemas(
        &self,
        query: CommandGetDbSchemas,
        request: Request<FlightDescriptor>,
    ) -> std::result::Result<Response<FlightInfo>, Status> {
        self.authenticate(request.metadata()).map_err(status_of)?;
        let sql = metadata_sql::schemas_sql(
            query.catalog.as_deref(),
            query.db_schema_filter_pattern.as_deref(),
        );
        self.statement_flight_info(request.into_inner(), vec![sql]).await
    }

    async fn get_flight_info_tables(
        &self,
        query: CommandGetTables,
        request: Request<FlightDescriptor>,
    ) -> std::result::Result<Response<FlightInfo>, Status> {
        self.authenticate(request.metadata()).map_err(status_of)?;
        let sql = metadata_sql::tables_sql(
            query.catalog.as_deref(),
            query.db_schema_filter_pattern.as_deref(),
            query.table_name_filter_pattern.as_deref(),
        );
        self.statement_flight_info(request.into_inner(), vec![sql]).await
    }

    async fn register_sql_info(&self, _id: i32, _result: &SqlInfo) {}
}
