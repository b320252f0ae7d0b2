//! # Events Service Client
//!
//! Request/response calls against the events service: full event fetches
//! (plain page or filtered) and the periodic reports.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::configs::feed_config::FeedConfig;
use crate::error::FeedError;
use crate::filters::filter_engine::ServerQuery;
use crate::quakes::event_record::{decode_batch_value, EventRecord};
use crate::reports::seismic_report::{ReportKind, SeismicReport};
use crate::retrieve::ky_http::{ApiClient, ApiResponse, ClientOptions};

/// Source of full event fetches.
#[async_trait]
pub trait FetchService: Send + Sync + 'static {
    /// Fetches the events matching `query`.
    async fn fetch_events(&self, query: &ServerQuery) -> Result<Vec<EventRecord>, FeedError>;
}

/// Source of aggregate reports.
#[async_trait]
pub trait ReportService: Send + Sync + 'static {
    /// Fetches the report for one fixed period.
    async fn fetch_report(&self, kind: ReportKind) -> Result<SeismicReport, FeedError>;
}

/// Relative paths of the service endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiPaths {
    /// Unfiltered, paginated events.
    pub events: String,
    /// Filtered events (POST).
    pub filter: String,
    /// Reports root; the kind is appended.
    pub reports: String,
}

/// # HTTP Fetch Service
///
/// Unfiltered queries go out as `GET <events>?page=&size=`, filtered ones as
/// `POST <filter>` with the query as JSON body.
pub struct HttpFetchService {
    client: ApiClient,
    paths: ApiPaths,
}

impl HttpFetchService {
    /// Wraps an existing client.
    pub fn new(client: ApiClient, paths: ApiPaths) -> Self {
        Self { client, paths }
    }

    /// Builds the client and paths from a config.
    pub fn from_config(config: &FeedConfig) -> Result<Self, FeedError> {
        let client = ApiClient::new(
            &config.base_url,
            ClientOptions {
                timeout: config.fetch_timeout(),
                max_retries: config.http_retries,
                device_id: config.device_id.clone(),
            },
        )?;
        Ok(Self::new(
            client,
            ApiPaths {
                events: config.events_path.clone(),
                filter: config.filter_path.clone(),
                reports: config.reports_path.clone(),
            },
        ))
    }
}

/// Turns a non-2xx response into `FeedError::Query`.
fn into_data<T>(path: &str, response: ApiResponse<T>) -> Result<T, FeedError> {
    match response {
        ApiResponse { success: true, data: Some(data), .. } => Ok(data),
        ApiResponse { status, error_body, .. } => {
            log::error!("Request to {} failed with HTTP {}", path, status);
            Err(FeedError::Query { status, body: error_body.unwrap_or_default() })
        }
    }
}

#[async_trait]
impl FetchService for HttpFetchService {
    async fn fetch_events(&self, query: &ServerQuery) -> Result<Vec<EventRecord>, FeedError> {
        let (path, response) = if query.is_filtered() {
            let path = self.paths.filter.clone();
            let resp = self
                .client
                .request::<Value, ServerQuery>(Method::POST, &path, None, Some(query))
                .await?;
            (path, resp)
        } else {
            let path = format!("{}?page={}&size={}", self.paths.events, query.page, query.size);
            let resp = self.client.request::<Value, ()>(Method::GET, &path, None, None).await?;
            (path, resp)
        };

        let body = into_data(&path, response)?;
        let events = decode_batch_value(body)?;
        log::info!("Fetched {} event(s) from {}", events.len(), path);
        Ok(events)
    }
}

#[async_trait]
impl ReportService for HttpFetchService {
    async fn fetch_report(&self, kind: ReportKind) -> Result<SeismicReport, FeedError> {
        let path = format!("{}/{}", self.paths.reports.trim_end_matches('/'), kind.path_segment());
        let response = self
            .client
            .request::<SeismicReport, ()>(Method::GET, &path, None, None)
            .await?;
        into_data(&path, response)
    }
}
