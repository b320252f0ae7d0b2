//! # HTTP Retrieval Utilities
//!
//! Asynchronous API client around `reqwest` with retry middleware for
//! transient failures and a uniform response container.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{DecodeError, FeedError};
use crate::ingestors::sse_stream::DEVICE_ID_HEADER;

/// A standardized container for API responses.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized body of a 2xx response.
    pub data: Option<T>,
    /// The raw body of a non-2xx response.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Whether the status code was in the 2xx range.
    pub success: bool,
    /// Response headers.
    pub headers: HeaderMap,
}

/// Client construction knobs.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Retries for transient failures (connect errors, 5xx, 429).
    pub max_retries: u32,
    /// Opaque device identifier sent as `X-Device-Id`.
    pub device_id: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            device_id: None,
        }
    }
}

/// # API Client
///
/// Joins relative paths onto a base URL, injects the device header and
/// retries transient failures with exponential backoff.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    device_id: Option<HeaderValue>,
    timeout: Duration,
}

impl ApiClient {
    /// Creates a client for `base_url`, which must be absolute.
    pub fn new(base_url: &str, options: ClientOptions) -> Result<Self, FeedError> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| FeedError::Config(format!("base URL `{base_url}`: {e}")))?;
        // Without a trailing slash `join` would replace the last segment.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let device_id = options
            .device_id
            .as_deref()
            .map(HeaderValue::from_str)
            .transpose()
            .map_err(|e| FeedError::Config(format!("device id is not a valid header value: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(concat!("quakefeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeedError::Config(format!("HTTP client: {e}")))?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(250), Duration::from_secs(5))
            .build_with_max_retries(options.max_retries);
        let inner = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner,
            base_url,
            device_id,
            timeout: options.timeout,
        })
    }

    /// The normalized base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// # Request
    ///
    /// Sends `body` as JSON when present and decodes a 2xx body into `T`.
    /// Non-2xx responses are not errors here: they come back with
    /// `success == false` and the raw body in `error_body`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
        body: Option<&B>,
    ) -> Result<ApiResponse<T>, FeedError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let full_url = self
            .base_url
            .join(path)
            .map_err(|e| FeedError::Config(format!("path `{path}`: {e}")))?;
        log::debug!("{} {}", method, full_url);

        let mut req = self.inner.request(method, full_url).header(ACCEPT, "application/json");
        if let Some(h) = headers {
            req = req.headers(h);
        }
        if let Some(device) = &self.device_id {
            req = req.header(DEVICE_ID_HEADER, device.clone());
        }
        if let Some(b) = body {
            let json_body = serde_json::to_string(b).map_err(|e| DecodeError::Json(e.to_string()))?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response = req.send().await.map_err(|e| self.send_error(e))?;
        let status = response.status();
        let resp_headers = response.headers().clone();

        if status.is_success() {
            let data = response.json::<T>().await.map_err(|e| {
                if e.is_timeout() {
                    FeedError::Timeout(self.timeout)
                } else {
                    FeedError::Decode(DecodeError::Json(e.to_string()))
                }
            })?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            let error_text = response.text().await.ok();
            log::warn!("HTTP {} from {}", status.as_u16(), path);
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }

    fn send_error(&self, e: reqwest_middleware::Error) -> FeedError {
        match &e {
            reqwest_middleware::Error::Reqwest(inner) if inner.is_timeout() => FeedError::Timeout(self.timeout),
            _ => FeedError::from(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn respond_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (format!("http://{}/backend", addr), server)
    }

    fn no_retry() -> ClientOptions {
        ClientOptions { max_retries: 0, device_id: Some("dev-1".into()), ..ClientOptions::default() }
    }

    #[tokio::test]
    async fn joins_paths_under_the_base() {
        let (base, server) = respond_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 11\r\nConnection: close\r\n\r\n{\"ok\":true}",
        )
        .await;
        let client = ApiClient::new(&base, no_retry()).unwrap();

        let resp = client
            .request::<Value, ()>(Method::GET, "api/events?page=0&size=100", None, None)
            .await
            .unwrap();
        assert!(resp.success);
        assert_eq!(resp.data.unwrap()["ok"], true);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /backend/api/events?page=0&size=100 "));
        assert!(request.to_ascii_lowercase().contains("x-device-id: dev-1"));
    }

    #[tokio::test]
    async fn non_success_keeps_the_body() {
        let (base, _server) = respond_once(
            "HTTP/1.1 400 Bad Request\r\nContent-Length: 13\r\nConnection: close\r\n\r\nbad magnitude",
        )
        .await;
        let client = ApiClient::new(&base, no_retry()).unwrap();
        let resp = client
            .request::<Value, _>(Method::POST, "api/events/filter", None, Some(&serde_json::json!({"page": 0})))
            .await
            .unwrap();
        assert!(!resp.success);
        assert_eq!(resp.status, 400);
        assert_eq!(resp.error_body.as_deref(), Some("bad magnitude"));
    }

    #[test]
    fn relative_base_is_a_config_error() {
        assert!(matches!(ApiClient::new("/api", ClientOptions::default()), Err(FeedError::Config(_))));
    }
}
