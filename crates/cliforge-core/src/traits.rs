use crate::error::HttpError;
use crate::types::{HttpRequest, HttpResponse, OperationSpec};
use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// HTTP transport the step executor and direct commands run through
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform one request; cancellation aborts the in-flight call
    async fn execute(&self, request: HttpRequest, cancel: &CancellationToken) -> Result<HttpResponse>;
}

/// Authenticator that decorates outgoing requests
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a token for the given profile
    async fn get_token(&self, profile: Option<&str>) -> Result<String>;

    /// Attach credentials to a request before it is sent
    fn attach(&self, request: &mut HttpRequest, token: &str);
}

/// Parsed OpenAPI operation catalog the command tree is built from
pub trait OperationCatalog: Send + Sync {
    fn operations(&self) -> &[OperationSpec];

    fn find(&self, operation_id: &str) -> Option<&OperationSpec> {
        self.operations()
            .iter()
            .find(|op| op.operation_id == operation_id)
    }
}

/// Output formatter rendering values for the terminal
pub trait OutputFormatter: Send + Sync {
    fn render(&self, value: &Value, format: &str, color: bool, pretty: bool) -> Result<String>;
}

/// reqwest-backed transport used by generated binaries
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest, cancel: &CancellationToken) -> Result<HttpResponse> {
        debug!("{} {}", request.method, request.url);

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| HttpError::Transport(format!("invalid method: {}", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = tokio::select! {
            result = builder.send() => result.map_err(|e| HttpError::Transport(e.to_string()))?,
            _ = cancel.cancelled() => {
                return Err(crate::error::CliforgeError::Cancelled(request.url.clone()).into());
            }
        };

        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_string(), v.to_string());
            }
        }
        let body = response
            .text()
            .await
            .map_err(|e| HttpError::Decode(e.to_string()))?;

        Ok(HttpResponse { status, headers, body })
    }
}
