//! Control-plane API transport.
//!
//! Repositories speak to the panel through the [`ApiClient`] trait; the
//! HTTP implementation adds authentication headers and a bounded retry
//! policy for transport failures.

use async_trait::async_trait;
use gameapd_common::{Error, Result};
use gameapd_config::Config;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Maximum transport retry attempts.
const DEFAULT_RETRY_COUNT: u32 = 30;

/// Backoff ceiling between attempts.
const MAX_RETRY_WAIT: Duration = Duration::from_secs(600);

const USER_AGENT: &str = "GameAP Daemon/3.0";

/// HTTP method subset used by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Patch,
    Post,
}

/// A request to the control plane. `path` may contain `{name}` segments
/// filled from `path_params`.
#[derive(Debug, Clone, Default)]
pub struct ApiRequest {
    pub method: Option<Method>,
    pub path: String,
    pub path_params: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Some(Method::Get),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn put(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Some(Method::Put),
            path: path.into(),
            body: Some(body),
            ..Default::default()
        }
    }

    pub fn patch(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Some(Method::Patch),
            path: path.into(),
            body: Some(body),
            ..Default::default()
        }
    }

    pub fn with_path_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.path_params.insert(name.into(), value.to_string());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    fn resolved_path(&self) -> String {
        let mut path = self.path.clone();
        for (name, value) in &self.path_params {
            path = path.replace(&format!("{{{name}}}"), value);
        }
        path
    }
}

/// Response body plus status; repositories interpret the status codes.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Error for any unexpected status.
    pub fn into_error(self) -> Error {
        Error::invalid_api_response(self.status, String::from_utf8_lossy(&self.body).into_owned())
    }
}

/// Transport seam for control-plane calls.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// HTTP client for the panel's daemon API.
pub struct HttpApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry_count: u32,
}

impl HttpApiClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::ApiTransport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: cfg.api_host.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            retry_count: DEFAULT_RETRY_COUNT,
        })
    }

    /// Override the number of transport retries (tests use 0).
    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    async fn send_once(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, request.resolved_path());

        let mut builder = match request.method.unwrap_or(Method::Get) {
            Method::Get => self.client.get(&url),
            Method::Put => self.client.put(&url),
            Method::Patch => self.client.patch(&url),
            Method::Post => self.client.post(&url),
        };

        builder = builder
            .header("X-Auth-Token", &self.api_key)
            .query(&request.query);

        if let Some(ref body) = request.body {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::ApiTransport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::ApiTransport(e.to_string()))?
            .to_vec();

        Ok(ApiResponse { status, body })
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut wait = Duration::from_millis(500);

        for attempt in 0..=self.retry_count {
            match self.send_once(&request).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.retry_count => {
                    warn!(attempt, "API request failed, retrying: {e}");
                    tokio::time::sleep(wait).await;
                    wait = (wait * 2).min(MAX_RETRY_WAIT);
                }
                Err(e) => return Err(e),
            }
        }

        unreachable!("retry loop always returns")
    }
}
