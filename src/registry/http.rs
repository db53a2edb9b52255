//! HTTP implementation of the registry client
//!
//! This module handles all HTTP requests against the PNCP APIs, including:
//! - Building the HTTP client with the configured user agent and timeout
//! - Building feed and items URLs from the configured base URLs
//! - Mapping status codes and transport failures to [`RegistryError`]
//! - Retrying transient failures through [`with_retry`]

use crate::config::{RegistryConfig, RetryConfig};
use crate::model::{ControlNumber, PageRequest, PageResult, RawEntry, RawItem};
use crate::registry::retry::{with_retry, RetryPolicy};
use crate::registry::{RegistryClient, RegistryError, RegistryResult};
use crate::{ConfigError, RecordResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Items are requested in a single page of this size
const ITEMS_PAGE_SIZE: &str = "10000";

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The registry configuration (user agent, timeout)
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &RegistryConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.timeout())
        .connect_timeout(Duration::from_secs(10).min(config.timeout()))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Feed response body of `/v1/contratacoes/atualizacao`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedPage {
    #[serde(default)]
    data: Vec<Value>,
    total_paginas: u32,
    #[serde(default)]
    total_registros: u64,
    #[serde(default)]
    numero_pagina: Option<u32>,
    #[serde(default)]
    paginas_restantes: u32,
    #[serde(default)]
    empty: bool,
}

impl FeedPage {
    fn into_page(self, url: &Url, requested: u32) -> RegistryResult<PageResult> {
        if self.total_paginas == 0 && !self.data.is_empty() {
            return Err(malformed(
                url,
                format!("{} entries on a feed reporting zero pages", self.data.len()),
            ));
        }

        let entries = self
            .data
            .into_iter()
            .map(RawEntry::from_json)
            .collect::<RecordResult<Vec<_>>>()
            .map_err(|e| malformed(url, e))?;

        Ok(PageResult {
            is_empty: self.empty || entries.is_empty(),
            entries,
            page_number: self.numero_pagina.unwrap_or(requested),
            total_pages: self.total_paginas,
            total_records: self.total_registros,
            pages_remaining: self.paginas_restantes,
        })
    }
}

/// Registry client backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    client: Client,
    consulta_url: Url,
    pncp_url: Url,
    retry: RetryPolicy,
}

impl HttpRegistryClient {
    /// Creates a client from the registry and retry configuration
    pub fn new(registry: &RegistryConfig, retry: &RetryConfig) -> Result<Self, ConfigError> {
        let consulta_url = parse_base(&registry.consulta_url)?;
        let pncp_url = parse_base(&registry.pncp_url)?;
        let client = build_http_client(registry)
            .map_err(|e| ConfigError::Validation(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            consulta_url,
            pncp_url,
            retry: RetryPolicy::from_config(retry),
        })
    }

    /// Replaces the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// `{consulta}/v1/contratacoes/atualizacao?...`
    pub fn page_url(&self, request: &PageRequest) -> Url {
        let mut url = endpoint(&self.consulta_url, &["v1", "contratacoes", "atualizacao"]);
        url.query_pairs_mut()
            .append_pair("dataInicial", &request.window.api_start())
            .append_pair("dataFinal", &request.window.api_end())
            .append_pair(
                "codigoModalidadeContratacao",
                &request.modality.code().to_string(),
            )
            .append_pair("pagina", &request.page_number.to_string())
            .append_pair("tamanhoPagina", &request.page_size.get().to_string());
        url
    }

    /// `{pncp}/v1/orgaos/{cnpj}/compras/{year}/{sequence}/itens?tamanhoPagina=10000`
    pub fn items_url(&self, control_number: &ControlNumber) -> Url {
        let year = control_number.year().to_string();
        let sequence = control_number.sequence().to_string();
        let mut url = endpoint(
            &self.pncp_url,
            &[
                "v1",
                "orgaos",
                control_number.cnpj(),
                "compras",
                year.as_str(),
                sequence.as_str(),
                "itens",
            ],
        );
        url.query_pairs_mut()
            .append_pair("tamanhoPagina", ITEMS_PAGE_SIZE);
        url
    }

    async fn get_page_once(&self, request: &PageRequest) -> RegistryResult<PageResult> {
        let url = self.page_url(request);
        debug!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(PageResult::empty(request.page_number));
        }
        if !status.is_success() {
            return Err(status_error(&url, status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&url, e))?;
        let feed: FeedPage = serde_json::from_slice(&body).map_err(|e| malformed(&url, e))?;
        feed.into_page(&url, request.page_number)
    }

    async fn get_items_once(&self, control_number: &ControlNumber) -> RegistryResult<Vec<RawItem>> {
        let url = self.items_url(control_number);
        debug!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(status_error(&url, status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&url, e))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let values: Vec<Value> = serde_json::from_slice(&body).map_err(|e| malformed(&url, e))?;
        values
            .into_iter()
            .map(|value| RawItem::from_json(control_number, value))
            .collect::<RecordResult<Vec<_>>>()
            .map_err(|e| malformed(&url, e))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn fetch_page(&self, request: &PageRequest) -> RegistryResult<PageResult> {
        let what = format!("feed page {}", request.page_number);
        with_retry(&self.retry, &what, || self.get_page_once(request)).await
    }

    async fn fetch_items(&self, control_number: &ControlNumber) -> RegistryResult<Vec<RawItem>> {
        let what = format!("items of {}", control_number);
        with_retry(&self.retry, &what, || self.get_items_once(control_number)).await
    }
}

fn parse_base(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("'{}': {}", value, e)))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidUrl(format!(
            "'{}' cannot be used as a base URL",
            value
        )));
    }
    Ok(url)
}

/// Appends path segments to a base URL, keeping the base's own path
fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    url.set_query(None);
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

fn status_error(url: &Url, status: StatusCode) -> RegistryError {
    let url = url.to_string();
    if status == StatusCode::TOO_MANY_REQUESTS {
        RegistryError::RateLimited { url }
    } else if status.is_server_error() {
        RegistryError::Server {
            url,
            status: status.as_u16(),
        }
    } else {
        RegistryError::Rejected {
            url,
            status: status.as_u16(),
        }
    }
}

fn transport_error(url: &Url, e: reqwest::Error) -> RegistryError {
    if e.is_timeout() {
        RegistryError::Timeout {
            url: url.to_string(),
        }
    } else {
        RegistryError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

fn malformed(url: &Url, e: impl std::fmt::Display) -> RegistryError {
    RegistryError::Malformed {
        url: url.to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IngestionWindow, Modality, PageSize};
    use chrono::NaiveDate;

    fn feed_url() -> Url {
        Url::parse("https://pncp.gov.br/api/consulta/v1/contratacoes/atualizacao").unwrap()
    }

    fn client() -> HttpRegistryClient {
        HttpRegistryClient::new(&RegistryConfig::default(), &RetryConfig::default()).unwrap()
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(&RegistryConfig::default()).is_ok());
    }

    #[test]
    fn test_page_url() {
        let window = IngestionWindow::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 3).unwrap(),
        )
        .unwrap();
        let request = PageRequest::first(window, Modality::PregaoEletronico, PageSize::Fifty).page(4);

        assert_eq!(
            client().page_url(&request).as_str(),
            "https://pncp.gov.br/api/consulta/v1/contratacoes/atualizacao\
             ?dataInicial=20250101&dataFinal=20250103&codigoModalidadeContratacao=6\
             &pagina=4&tamanhoPagina=50"
        );
    }

    #[test]
    fn test_items_url() {
        let cn = ControlNumber::parse("07854402000100-1-000054/2025").unwrap();
        assert_eq!(
            client().items_url(&cn).as_str(),
            "https://pncp.gov.br/api/pncp/v1/orgaos/07854402000100/compras/2025/54/itens\
             ?tamanhoPagina=10000"
        );
    }

    #[test]
    fn test_endpoint_tolerates_trailing_slash() {
        let base = Url::parse("http://127.0.0.1:8080/api/").unwrap();
        assert_eq!(
            endpoint(&base, &["v1", "x"]).as_str(),
            "http://127.0.0.1:8080/api/v1/x"
        );
    }

    #[test]
    fn test_status_classification() {
        let url = Url::parse("https://pncp.gov.br/").unwrap();
        assert!(status_error(&url, StatusCode::TOO_MANY_REQUESTS).is_rate_limit());
        assert!(status_error(&url, StatusCode::BAD_GATEWAY).is_transient());
        assert!(!status_error(&url, StatusCode::BAD_REQUEST).is_transient());
    }

    #[test]
    fn test_feed_page_parsing() {
        let feed: FeedPage = serde_json::from_str(
            r#"{
                "data": [{
                    "numeroControlePNCP": "07854402000100-1-000054/2025",
                    "dataAtualizacaoGlobal": "2025-01-02T10:00:00"
                }],
                "totalRegistros": 1,
                "totalPaginas": 1,
                "numeroPagina": 1,
                "paginasRestantes": 0,
                "empty": false
            }"#,
        )
        .unwrap();

        let page = feed.into_page(&feed_url(), 1).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.total_pages, 1);
        assert!(!page.is_empty);
    }

    #[test]
    fn test_feed_page_with_bad_entry_is_malformed() {
        let feed: FeedPage =
            serde_json::from_str(r#"{"data": [{"numeroControlePNCP": "bogus"}], "totalPaginas": 1}"#)
                .unwrap();
        assert!(feed.into_page(&feed_url(), 1).is_err());
    }

    #[test]
    fn test_feed_page_requires_page_count() {
        let missing = serde_json::from_str::<FeedPage>(r#"{"data": []}"#);
        assert!(missing.is_err());

        let error_body = serde_json::from_str::<FeedPage>(r#"{"status": 500, "message": "Erro interno"}"#);
        assert!(error_body.is_err());
    }

    #[test]
    fn test_entries_without_pages_are_malformed() {
        let feed: FeedPage = serde_json::from_str(
            r#"{
                "data": [{
                    "numeroControlePNCP": "07854402000100-1-000054/2025",
                    "dataAtualizacaoGlobal": "2025-01-02T10:00:00"
                }],
                "totalPaginas": 0
            }"#,
        )
        .unwrap();

        let err = feed.into_page(&feed_url(), 1).unwrap_err();
        assert!(matches!(err, RegistryError::Malformed { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_empty_feed_page() {
        let feed: FeedPage =
            serde_json::from_str(r#"{"data": [], "totalPaginas": 0, "empty": true}"#).unwrap();
        let page = feed.into_page(&feed_url(), 1).unwrap();
        assert!(page.is_empty);
        assert_eq!(page.total_pages, 0);
    }
}
