//! Integration tests for the ingestion engine
//!
//! These tests use wiremock to stand in for both PNCP APIs and drive the
//! real HTTP client, scanner, crawler and coordinator end-to-end.

use chrono::NaiveDate;
use pncp_ingest::config::{Config, CrawlerConfig, OutputConfig, RegistryConfig, RetryConfig};
use pncp_ingest::crawler::{probe_window, Coordinator, IngestMode, IngestRequest};
use pncp_ingest::model::{ControlNumber, IngestionWindow, Modality, PageRequest, PageSize};
use pncp_ingest::registry::{HttpRegistryClient, RegistryClient, RegistryError, RetryPolicy};
use pncp_ingest::storage::{RunStatus, SqliteStorage, Storage};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FEED_PATH: &str = "/v1/contratacoes/atualizacao";
const ITEMS_PATH: &str = r"^/v1/orgaos/\d{14}/compras/\d{4}/\d+/itens$";

/// Creates a test configuration pointing both APIs at the mock server
fn create_test_config(base_url: &str, db_path: &str) -> Config {
    Config {
        registry: RegistryConfig {
            consulta_url: base_url.to_string(),
            pncp_url: base_url.to_string(),
            timeout_secs: 5,
            ..RegistryConfig::default()
        },
        retry: RetryConfig::default(),
        crawler: CrawlerConfig {
            max_concurrent_pages: 4,
            cooldown_secs: 1,
            max_page_retries: 2,
        },
        output: OutputConfig {
            database_path: db_path.to_string(),
            flush_every: 2,
        },
    }
}

fn create_coordinator(
    server: &MockServer,
    db_path: &Path,
) -> Coordinator<HttpRegistryClient, SqliteStorage> {
    let config = create_test_config(&server.uri(), &db_path.to_string_lossy());
    let client = HttpRegistryClient::new(&config.registry, &config.retry)
        .unwrap()
        .with_retry_policy(RetryPolicy::none());
    let storage = SqliteStorage::new(db_path).unwrap();
    Coordinator::new(config, Arc::new(client), storage, "test-hash".to_string())
}

fn control_number(sequence: u32) -> String {
    format!("07854402000100-1-{:06}/2025", sequence)
}

/// Feed page body with entries listed oldest first
fn feed_page(page: u32, total_pages: u32, entries: &[(u32, &str)]) -> Value {
    let data: Vec<Value> = entries
        .iter()
        .map(|(sequence, updated_at)| {
            json!({
                "numeroControlePNCP": control_number(*sequence),
                "dataAtualizacaoGlobal": updated_at,
                "objetoCompra": format!("Compra {}", sequence),
            })
        })
        .collect();
    json!({
        "data": data,
        "totalRegistros": total_pages * entries.len() as u32,
        "totalPaginas": total_pages,
        "numeroPagina": page,
        "paginasRestantes": total_pages - page,
        "empty": false,
    })
}

async fn mount_page(server: &MockServer, page: u32, body: Value, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(FEED_PATH))
        .and(query_param("pagina", page.to_string().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_items(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path_regex(ITEMS_PATH))
        .respond_with(response)
        .mount(server)
        .await;
}

fn two_items() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!([
        {"numeroItem": 1, "descricao": "Caneta"},
        {"numeroItem": 2, "descricao": "Papel"},
    ]))
}

fn window() -> IngestionWindow {
    IngestionWindow::new(
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
    )
    .unwrap()
}

/// Three pages, all inside the window
async fn mount_full_window(server: &MockServer) {
    mount_page(
        server,
        1,
        feed_page(1, 3, &[(1, "2025-01-01T08:00:00"), (2, "2025-01-01T09:00:00")]),
        1,
    )
    .await;
    mount_page(
        server,
        2,
        feed_page(2, 3, &[(3, "2025-01-01T18:00:00"), (4, "2025-01-02T07:00:00")]),
        1,
    )
    .await;
    mount_page(
        server,
        3,
        feed_page(3, 3, &[(5, "2025-01-02T10:00:00"), (6, "2025-01-02T23:00:00")]),
        1,
    )
    .await;
}

#[tokio::test]
async fn test_scan_ingests_whole_window() {
    let server = MockServer::start().await;
    mount_full_window(&server).await;
    mount_items(&server, two_items()).await;

    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("ingest.db");
    let mut coordinator = create_coordinator(&server, &db_path);

    let request = IngestRequest::new(IngestMode::Scan, Modality::PregaoEletronico, window());
    let report = coordinator.run(&request).await;

    assert!(report.success, "run failed: {:?}", report.errors);
    assert_eq!(report.records_processed, 6);
    assert_eq!(report.items_processed, 12);
    assert_eq!(coordinator.storage().count_records().unwrap(), 6);
    assert_eq!(coordinator.storage().count_items().unwrap(), 12);

    let run = coordinator.storage().get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.mode, IngestMode::Scan);
    assert_eq!(run.config_hash, "test-hash");
    assert_eq!(run.window_start, "2025-01-01");
    assert_eq!(run.window_end, "2025-01-02");
}

#[tokio::test]
async fn test_scan_never_requests_pages_older_than_window() {
    let server = MockServer::start().await;
    // Page 1 is the probe; page 2 lies entirely before the window.
    mount_page(
        &server,
        1,
        feed_page(1, 3, &[(1, "2024-12-30T08:00:00"), (2, "2024-12-30T09:00:00")]),
        1,
    )
    .await;
    mount_page(
        &server,
        2,
        feed_page(2, 3, &[(3, "2024-12-31T08:00:00"), (4, "2024-12-31T09:00:00")]),
        0,
    )
    .await;
    mount_page(
        &server,
        3,
        feed_page(
            3,
            3,
            &[
                (5, "2024-12-31T23:59:59"),
                (6, "2025-01-01T00:00:00"),
                (7, "2025-01-02T12:00:00"),
            ],
        ),
        1,
    )
    .await;
    mount_items(&server, two_items()).await;

    let temp_dir = tempfile::tempdir().unwrap();
    let mut coordinator = create_coordinator(&server, &temp_dir.path().join("ingest.db"));

    let request = IngestRequest::new(IngestMode::Scan, Modality::PregaoEletronico, window());
    let report = coordinator.run(&request).await;

    assert!(report.success, "run failed: {:?}", report.errors);
    assert_eq!(report.records_processed, 2);

    let storage = coordinator.storage();
    assert!(storage
        .get_record(&control_number(6).parse::<ControlNumber>().unwrap())
        .unwrap()
        .is_some());
    assert!(storage
        .get_record(&control_number(5).parse::<ControlNumber>().unwrap())
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_crawl_persists_every_page() {
    let server = MockServer::start().await;
    mount_full_window(&server).await;
    mount_items(&server, two_items()).await;

    let temp_dir = tempfile::tempdir().unwrap();
    let mut coordinator = create_coordinator(&server, &temp_dir.path().join("ingest.db"));

    let request = IngestRequest::new(IngestMode::Crawl, Modality::PregaoEletronico, window());
    let report = coordinator.run(&request).await;

    assert!(report.success, "run failed: {:?}", report.errors);
    assert_eq!(report.records_processed, 6);

    let storage = coordinator.storage();
    for sequence in 1..=6 {
        let key: ControlNumber = control_number(sequence).parse().unwrap();
        let record = storage.get_record(&key).unwrap().unwrap();
        assert_eq!(record.items.len(), 2);
        assert_eq!(
            record.entry.payload["objetoCompra"],
            json!(format!("Compra {}", sequence))
        );
    }
}

#[tokio::test]
async fn test_missing_items_store_record_without_items() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        1,
        feed_page(1, 1, &[(1, "2025-01-01T08:00:00")]),
        1,
    )
    .await;
    mount_items(&server, ResponseTemplate::new(404)).await;

    let temp_dir = tempfile::tempdir().unwrap();
    let mut coordinator = create_coordinator(&server, &temp_dir.path().join("ingest.db"));

    let request = IngestRequest::new(IngestMode::Scan, Modality::PregaoEletronico, window());
    let report = coordinator.run(&request).await;

    assert!(report.success, "run failed: {:?}", report.errors);
    let key: ControlNumber = control_number(1).parse().unwrap();
    let record = coordinator.storage().get_record(&key).unwrap().unwrap();
    assert!(record.items.is_empty());
    assert_eq!(coordinator.storage().count_items().unwrap(), 0);
}

#[tokio::test]
async fn test_rejected_page_fails_run_and_persists_nothing() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        1,
        feed_page(1, 2, &[(1, "2025-01-01T08:00:00"), (2, "2025-01-01T09:00:00")]),
        1,
    )
    .await;
    Mock::given(method("GET"))
        .and(path(FEED_PATH))
        .and(query_param("pagina", "2"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&server)
        .await;
    mount_items(&server, two_items()).await;

    let temp_dir = tempfile::tempdir().unwrap();
    let mut coordinator = create_coordinator(&server, &temp_dir.path().join("ingest.db"));

    let request = IngestRequest::new(IngestMode::Crawl, Modality::PregaoEletronico, window());
    let report = coordinator.run(&request).await;

    assert!(!report.success);
    assert!(!report.errors.is_empty());
    assert!(report.errors.iter().any(|e| e.contains("400")));
    assert_eq!(coordinator.storage().count_records().unwrap(), 0);

    let run = coordinator.storage().get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_rerun_leaves_store_unchanged() {
    let server = MockServer::start().await;
    for (page, entries) in [
        (1, [(1, "2025-01-01T08:00:00"), (2, "2025-01-01T09:00:00")]),
        (2, [(3, "2025-01-02T08:00:00"), (4, "2025-01-02T09:00:00")]),
    ] {
        mount_page(&server, page, feed_page(page, 2, &entries), 2).await;
    }
    mount_items(&server, two_items()).await;

    let temp_dir = tempfile::tempdir().unwrap();
    let mut coordinator = create_coordinator(&server, &temp_dir.path().join("ingest.db"));
    let request = IngestRequest::new(IngestMode::Scan, Modality::PregaoEletronico, window());

    let first = coordinator.run(&request).await;
    assert!(first.success, "first run failed: {:?}", first.errors);
    let key: ControlNumber = control_number(3).parse().unwrap();
    let before = coordinator.storage().get_record(&key).unwrap().unwrap();

    let second = coordinator.run(&request).await;
    assert!(second.success, "second run failed: {:?}", second.errors);
    assert_ne!(first.run_id, second.run_id);

    let storage = coordinator.storage();
    assert_eq!(storage.count_records().unwrap(), 4);
    assert_eq!(storage.count_items().unwrap(), 8);
    assert_eq!(storage.get_record(&key).unwrap().unwrap(), before);
    assert_eq!(storage.count_runs_by_status(RunStatus::Completed).unwrap(), 2);
}

#[tokio::test]
async fn test_feed_page_without_page_count_fails_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FEED_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "numeroControlePNCP": control_number(1),
                "dataAtualizacaoGlobal": "2025-01-01T08:00:00",
            }],
        })))
        .mount(&server)
        .await;
    mount_items(&server, two_items()).await;

    let temp_dir = tempfile::tempdir().unwrap();
    let mut coordinator = create_coordinator(&server, &temp_dir.path().join("ingest.db"));

    for mode in [IngestMode::Scan, IngestMode::Crawl] {
        let request = IngestRequest::new(mode, Modality::PregaoEletronico, window());
        let report = coordinator.run(&request).await;

        assert!(!report.success, "{} run should fail", mode);
        assert!(report.errors.iter().any(|e| e.contains("Malformed")));
    }
    assert_eq!(coordinator.storage().count_records().unwrap(), 0);
    assert_eq!(
        coordinator.storage().count_runs_by_status(RunStatus::Failed).unwrap(),
        2
    );
}

#[tokio::test]
async fn test_error_shaped_feed_body_fails_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FEED_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": 500, "message": "Erro interno"})),
        )
        .mount(&server)
        .await;

    let temp_dir = tempfile::tempdir().unwrap();
    let mut coordinator = create_coordinator(&server, &temp_dir.path().join("ingest.db"));

    let request = IngestRequest::new(IngestMode::Scan, Modality::PregaoEletronico, window());
    let report = coordinator.run(&request).await;

    assert!(!report.success);
    assert_eq!(report.records_processed, 0);
    let run = coordinator.storage().get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
}

fn timeout_client(server: &MockServer, retry: RetryPolicy) -> HttpRegistryClient {
    let mut config = create_test_config(&server.uri(), "unused.db");
    config.registry.timeout_secs = 1;
    HttpRegistryClient::new(&config.registry, &config.retry)
        .unwrap()
        .with_retry_policy(retry)
}

fn first_page_request() -> PageRequest {
    PageRequest::first(window(), Modality::PregaoEletronico, PageSize::Fifty)
}

#[tokio::test]
async fn test_slow_response_is_transient_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FEED_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(feed_page(1, 1, &[(1, "2025-01-01T08:00:00")]))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = timeout_client(&server, RetryPolicy::none());
    let err = client.fetch_page(&first_page_request()).await.unwrap_err();

    assert!(matches!(err, RegistryError::Timeout { .. }), "{:?}", err);
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_timed_out_call_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FEED_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(feed_page(1, 1, &[(1, "2025-01-01T08:00:00")]))
                .set_delay(Duration::from_secs(3)),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, 1, feed_page(1, 1, &[(1, "2025-01-01T08:00:00")]), 1).await;

    let retry = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(10),
    };
    let client = timeout_client(&server, retry);
    let page = client.fetch_page(&first_page_request()).await.unwrap();

    assert_eq!(page.total_pages, 1);
    assert_eq!(page.entries.len(), 1);
}

#[tokio::test]
async fn test_dry_run_sizing_leaves_database_untouched() {
    let server = MockServer::start().await;
    mount_page(&server, 1, feed_page(1, 4, &[(1, "2025-01-01T08:00:00")]), 1).await;

    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("nested").join("ingest.db");
    let config = create_test_config(&server.uri(), &db_path.to_string_lossy());
    let client = HttpRegistryClient::new(&config.registry, &config.retry).unwrap();

    let page = probe_window(
        &client,
        window(),
        Modality::PregaoEletronico,
        config.registry.page_size().unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(page.total_pages, 4);
    assert!(!db_path.exists());
    assert!(!db_path.parent().unwrap().exists());
}
