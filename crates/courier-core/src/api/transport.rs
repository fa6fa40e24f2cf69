use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, COOKIE};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;

use super::{ApiError, ApiRequest, ApiResponse, CredentialMode, TransportError};

const USER_AGENT: &str = "courier-rs/0.1.0";

/// Performs a prepared request against the API and returns the full response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// `reqwest`-backed transport with a per-call timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: Client,
    base_url: Url,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        // No cookie store is enabled, so the only ambient credential is the Authorization header.
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|err| TransportError::Other(err.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            timeout: config.timeout,
        })
    }

    fn resolve(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| TransportError::Other(format!("invalid path '{path}': {err}")))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.resolve(&request.path)?;
        let mut headers = request.headers.clone();
        if request.credentials == CredentialMode::Omit {
            headers.remove(AUTHORIZATION);
            headers.remove(COOKIE);
        }

        let mut builder = self
            .http
            .request(request.method.clone(), url.clone())
            .headers(headers)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, %url, "sending request");
        let response = builder
            .send()
            .await
            .map_err(|err| TransportError::from_reqwest(err, self.timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::from_reqwest(err, self.timeout))?;
        debug!(%status, %url, "received response");
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
