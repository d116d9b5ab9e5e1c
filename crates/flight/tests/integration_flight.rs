//! End-to-end tests: a real server on an ephemeral port, driven through the
//! Flight SQL client.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow_flight::flight_service_server::FlightServiceServer;
use arrow_flight::sql::client::FlightSqlServiceClient;
use arrow_flight::sql::CommandStatementIngest;
use arrow_flight::CancelFlightInfoRequest;
use futures::TryStreamExt;
use tonic::transport::{Channel, Server};

use duckgate_common::{AccessMode, AccessRule, ObjectKind, ServerConfig, UserCredential};
use duckgate_flight::{DuckGateFlightSqlService, GateState};

const LONG_RUNNING_QUERY: &str = "with t as \
    (select len(split(concat('abcdefghijklmnopqrstuvwxyz:', generate_series), ':')) as len \
     from generate_series(1, 1000000000)) \
     select count(*) from t where len = 10";

struct TestServer {
    addr: SocketAddr,
    state: Arc<GateState>,
    task: tokio::task::JoinHandle<Result<(), tonic::transport::Error>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn base_config(warehouse: &Path) -> ServerConfig {
    ServerConfig {
        access_mode: AccessMode::Complete,
        warehouse_path: warehouse.display().to_string(),
        users: vec![
            UserCredential {
                username: "admin".to_string(),
                password: "password".to_string(),
            },
            UserCredential {
                username: "restricted".to_string(),
                password: "password".to_string(),
            },
        ],
        ..ServerConfig::default()
    }
}

async fn start_server(config: ServerConfig) -> TestServer {
    let state = Arc::new(GateState::new(config).expect("gate state"));
    let service = DuckGateFlightSqlService::new(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let task = tokio::spawn(
        Server::builder()
            .add_service(FlightServiceServer::new(service))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener)),
    );

    TestServer { addr, state, task }
}

async fn connect(addr: &SocketAddr) -> FlightSqlServiceClient<Channel> {
    let channel = Channel::from_shared(format!("http://{addr}"))
        .expect("endpoint")
        .connect()
        .await
        .expect("connect");
    FlightSqlServiceClient::new(channel)
}

async fn authed_client(addr: &SocketAddr, user: &str) -> FlightSqlServiceClient<Channel> {
    let mut client = connect(addr).await;
    client.handshake(user, "password").await.expect("handshake");
    client
}

async fn collect_rows(
    client: &mut FlightSqlServiceClient<Channel>,
    info: &arrow_flight::FlightInfo,
) -> Vec<RecordBatch> {
    let mut out = Vec::new();
    for endpoint in &info.endpoint {
        let ticket = endpoint.ticket.clone().expect("ticket");
        let batches: Vec<RecordBatch> = client
            .do_get(ticket)
            .await
            .expect("do_get")
            .try_collect()
            .await
            .expect("collect");
        out.extend(batches);
    }
    out
}

fn row_count(batches: &[RecordBatch]) -> usize {
    batches.iter().map(RecordBatch::num_rows).sum()
}

/// Three-file, six-row hive-partitioned parquet dataset.
fn write_hive_fixture(state: &GateState, root: &Path) {
    for (dt, p, values) in [
        ("2024-01-01", "1", (1, 2)),
        ("2024-01-01", "2", (3, 4)),
        ("2024-01-02", "1", (5, 6)),
    ] {
        let leaf = root.join(format!("hive_table/dt={dt}/p={p}"));
        std::fs::create_dir_all(&leaf).expect("mkdir");
        let target = leaf.join("data.parquet");
        state
            .pool
            .execute_batch(&format!(
                "COPY (SELECT * FROM (VALUES ({}), ({})) t(v)) TO '{}' (FORMAT PARQUET)",
                values.0,
                values.1,
                target.display()
            ))
            .expect("copy parquet");
    }
}

/// Two-file, five-row Delta table with partition column `p`.
fn write_delta_fixture(state: &GateState, root: &Path) -> std::path::PathBuf {
    let table = root.join("delta_table");
    for (p, sql) in [
        ("1", "SELECT * FROM (VALUES (1), (2)) t(v)"),
        ("2", "SELECT * FROM (VALUES (3), (4), (5)) t(v)"),
    ] {
        let leaf = table.join(format!("p={p}"));
        std::fs::create_dir_all(&leaf).expect("mkdir");
        state
            .pool
            .execute_batch(&format!(
                "COPY ({sql}) TO '{}' (FORMAT PARQUET)",
                leaf.join(format!("part-000{p}.parquet")).display()
            ))
            .expect("copy parquet");
    }

    let log = table.join("_delta_log");
    std::fs::create_dir_all(&log).expect("mkdir log");
    let schema_string = r#"{\"type\":\"struct\",\"fields\":[{\"name\":\"v\",\"type\":\"integer\",\"nullable\":true,\"metadata\":{}},{\"name\":\"p\",\"type\":\"string\",\"nullable\":true,\"metadata\":{}}]}"#;
    let commit = format!(
        "{{\"protocol\":{{\"minReaderVersion\":1,\"minWriterVersion\":2}}}}\n\
         {{\"metaData\":{{\"id\":\"t0\",\"format\":{{\"provider\":\"parquet\",\"options\":{{}}}},\"schemaString\":\"{schema_string}\",\"partitionColumns\":[\"p\"],\"configuration\":{{}}}}}}\n\
         {{\"add\":{{\"path\":\"p=1/part-0001.parquet\",\"partitionValues\":{{\"p\":\"1\"}},\"size\":1,\"modificationTime\":0,\"dataChange\":true}}}}\n\
         {{\"add\":{{\"path\":\"p=2/part-0002.parquet\",\"partitionValues\":{{\"p\":\"2\"}},\"size\":1,\"modificationTime\":0,\"dataChange\":true}}}}\n"
    );
    std::fs::write(log.join("00000000000000000000.json"), commit).expect("commit");
    table
}

#[tokio::test]
async fn simple_statement_streams_generate_series() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = start_server(base_config(dir.path())).await;
    let mut client = authed_client(&server.addr, "admin").await;

    let info = client
        .execute("SELECT * FROM generate_series(10)".to_string(), None)
        .await
        .expect("execute");
    assert_eq!(info.endpoint.len(), 1);

    let batches = collect_rows(&mut client, &info).await;
    assert_eq!(row_count(&batches), 11);

    let column = batches[0]
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("int64 column");
    assert_eq!(column.value(0), 0);
    assert_eq!(column.value(column.len() - 1), 10);
}

#[tokio::test]
async fn fetch_size_header_bounds_batch_sizes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = start_server(base_config(dir.path())).await;
    let mut client = authed_client(&server.addr, "admin").await;
    client.set_header("fetch-size", "10");

    let info = client
        .execute("select * from generate_series(100)".to_string(), None)
        .await
        .expect("execute");
    let batches = collect_rows(&mut client, &info).await;

    assert_eq!(row_count(&batches), 101);
    assert_eq!(batches.len(), 11);
    assert!(batches.iter().all(|b| b.num_rows() <= 10));
}

#[tokio::test]
async fn bad_statement_defers_binder_error_to_fetch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = start_server(base_config(dir.path())).await;
    let mut client = authed_client(&server.addr, "admin").await;

    let info = client
        .execute("SELECT x FROM generate_series(10)".to_string(), None)
        .await
        .expect("getFlightInfo succeeds; binding is deferred");

    let ticket = info.endpoint[0].ticket.clone().expect("ticket");
    let fetched: Result<Vec<RecordBatch>, _> = match client.do_get(ticket).await {
        Ok(stream) => stream.try_collect().await,
        Err(e) => Err(e),
    };
    assert!(fetched.is_err());
}

#[tokio::test]
async fn missing_or_bad_credentials_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = start_server(base_config(dir.path())).await;

    let mut anonymous = connect(&server.addr).await;
    assert!(anonymous
        .execute("SELECT 1".to_string(), None)
        .await
        .is_err());

    let mut wrong = connect(&server.addr).await;
    assert!(wrong.handshake("admin", "nope").await.is_err());

    let mut stale = connect(&server.addr).await;
    stale.set_token("not-a-jwt".to_string());
    assert!(stale.execute("SELECT 1".to_string(), None).await.is_err());
}

#[tokio::test]
async fn prepared_statement_executes_repeatedly_then_closes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = start_server(base_config(dir.path())).await;
    let mut client = authed_client(&server.addr, "admin").await;

    let mut prepared = client
        .prepare("SELECT * FROM generate_series(10)".to_string(), None)
        .await
        .expect("prepare");

    for _ in 0..2 {
        let info = prepared.execute().await.expect("execute");
        let ticket = info.endpoint[0].ticket.clone().expect("ticket");
        let batches: Vec<RecordBatch> = client
            .do_get(ticket)
            .await
            .expect("do_get")
            .try_collect()
            .await
            .expect("collect");
        assert_eq!(row_count(&batches), 11);
    }

    prepared.close().await.expect("close");
}

#[tokio::test]
async fn restricted_mode_weaves_row_filters() {
    let dir = tempfile::tempdir().expect("tempdir");
    let glob = format!("{}/hive_table/*/*/*.parquet", dir.path().display());

    let mut config = base_config(dir.path());
    config.access_mode = AccessMode::Restricted;
    config.access_rules = vec![AccessRule {
        principal: Some("restricted".to_string()),
        database: None,
        schema: None,
        table_or_path: Some(glob.clone()),
        object_kind: ObjectKind::TableFunction,
        columns: vec![],
        filter: Some("p = '1'".to_string()),
        function_name: None,
        expiration: None,
    }];

    let server = start_server(config).await;
    write_hive_fixture(&server.state, dir.path());

    let mut client = authed_client(&server.addr, "restricted").await;
    let info = client
        .execute(format!("select * from read_parquet('{glob}')"), None)
        .await
        .expect("execute");
    let batches = collect_rows(&mut client, &info).await;

    // Six rows on disk; the woven filter keeps only partition p=1.
    assert_eq!(row_count(&batches), 4);
    for batch in &batches {
        let schema = batch.schema();
        let p_index = schema.index_of("p").expect("partition column present");
        let p = batch
            .column(p_index)
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("p column");
        assert!((0..p.len()).all(|i| p.value(i) == "1"));
    }

    // The same user may not read outside the granted path.
    let denied = client
        .execute(
            format!("select * from read_parquet('{}/secrets.parquet')", dir.path().display()),
            None,
        )
        .await;
    assert!(denied.is_err());
}

#[tokio::test]
async fn parallelize_splits_hive_table_into_per_file_endpoints() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = start_server(base_config(dir.path())).await;
    write_hive_fixture(&server.state, dir.path());

    let mut client = authed_client(&server.addr, "admin").await;
    client.set_header("parallelize", "true");
    client.set_header("split-size", "1");

    let root = dir.path().join("hive_table");
    let info = client
        .execute(
            format!(
                "select * from read_parquet('{}', hive_types = {{'dt': DATE, 'p': VARCHAR}})",
                root.display()
            ),
            None,
        )
        .await
        .expect("execute");

    assert_eq!(info.endpoint.len(), 3);
    let batches = collect_rows(&mut client, &info).await;
    assert_eq!(row_count(&batches), 6);
}

#[tokio::test]
async fn parallelize_splits_delta_table_by_live_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = start_server(base_config(dir.path())).await;
    let table = write_delta_fixture(&server.state, dir.path());

    let mut client = authed_client(&server.addr, "admin").await;
    client.set_header("parallelize", "true");
    client.set_header("split-size", "1");

    let info = client
        .execute(
            format!("select * from read_delta('{}')", table.display()),
            None,
        )
        .await
        .expect("execute");

    assert_eq!(info.endpoint.len(), 2);
    let batches = collect_rows(&mut client, &info).await;
    assert_eq!(row_count(&batches), 5);
}

#[tokio::test]
async fn cancel_terminates_a_long_running_stream() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = start_server(base_config(dir.path())).await;
    let mut client = authed_client(&server.addr, "admin").await;

    let info = client
        .execute(LONG_RUNNING_QUERY.to_string(), None)
        .await
        .expect("execute");
    let ticket = info.endpoint[0].ticket.clone().expect("ticket");

    let mut canceller = authed_client(&server.addr, "admin").await;
    let cancel_info = info.clone();
    let cancel_task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        canceller
            .cancel_flight_info(CancelFlightInfoRequest {
                info: Some(cancel_info),
            })
            .await
    });

    let fetched: Result<Vec<RecordBatch>, _> = match client.do_get(ticket).await {
        Ok(stream) => stream.try_collect().await,
        Err(e) => Err(e),
    };
    assert!(fetched.is_err(), "cancelled stream must not complete");
    cancel_task.await.expect("cancel task").expect("cancel rpc");

    // Cancelling again is a no-op.
    client
        .cancel_flight_info(CancelFlightInfoRequest { info: Some(info) })
        .await
        .expect("idempotent cancel");
}

#[tokio::test]
async fn ingest_writes_once_then_conflicts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = start_server(base_config(dir.path())).await;
    let mut client = authed_client(&server.addr, "admin").await;

    let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
    let batch = RecordBatch::try_new(
        Arc::clone(&schema),
        vec![Arc::new(Int64Array::from(vec![1, 2, 3]))],
    )
    .expect("batch");

    let command = CommandStatementIngest {
        table_definition_options: None,
        table: String::new(),
        schema: None,
        catalog: None,
        temporary: false,
        transaction_id: None,
        options: [("path".to_string(), "test_123.parquet".to_string())]
            .into_iter()
            .collect(),
    };

    let rows = client
        .execute_ingest(
            command.clone(),
            futures::stream::iter(vec![Ok(batch.clone())]),
        )
        .await
        .expect("first ingest");
    assert_eq!(rows, 3);

    let again = client
        .execute_ingest(command, futures::stream::iter(vec![Ok(batch)]))
        .await;
    assert!(again.is_err(), "second ingest of the same path must fail");

    // The first file is intact and readable.
    let target = dir.path().join("test_123.parquet");
    let mut reader = authed_client(&server.addr, "admin").await;
    let info = reader
        .execute(
            format!("select count(*) as n from read_parquet('{}')", target.display()),
            None,
        )
        .await
        .expect("read back");
    let batches = collect_rows(&mut reader, &info).await;
    let n = batches[0]
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("count column");
    assert_eq!(n.value(0), 3);
}

#[tokio::test]
async fn data_schema_header_coerces_scalar_results() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = start_server(base_config(dir.path())).await;
    let mut client = authed_client(&server.addr, "admin").await;
    client.set_header("data-schema", "one%20string");

    let info = client
        .execute("select 1".to_string(), None)
        .await
        .expect("execute");
    let batches = collect_rows(&mut client, &info).await;

    assert_eq!(row_count(&batches), 1);
    let schema = batches[0].schema();
    assert_eq!(schema.field(0).name(), "one");
    let values = batches[0]
        .column(0)
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("utf8 column");
    assert_eq!(values.value(0), "1");
}

#[tokio::test]
async fn catalog_metadata_comes_from_the_engine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = base_config(dir.path());
    config.init_sql = vec!["CREATE TABLE gate_meta_probe (a INTEGER)".to_string()];
    let server = start_server(config).await;
    let mut client = authed_client(&server.addr, "admin").await;

    let info = client.get_catalogs().await.expect("get_catalogs");
    let batches = collect_rows(&mut client, &info).await;
    assert!(row_count(&batches) >= 1);
    assert_eq!(batches[0].schema().field(0).name(), "TABLE_CAT");
}
