//! Side-channel HTTP API: invoke, cancel, and the read-only catalog.
//!
//! These calls run outside the shared event stream; only their effects come
//! back as stream events. The trait exists so the dispatcher can be driven
//! by a fake in tests.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use bridge_protocol::{AgentInfo, CancelRequest, InvokeRequest, InvokeResponse, ToolInfo};

use crate::error::{BridgeError, BridgeResult};

/// Minimal control-plane abstraction for testability.
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Submit an invocation; returns the server-assigned request id.
    async fn invoke(&self, request: InvokeRequest) -> BridgeResult<InvokeResponse>;

    /// Request cancellation of a running invocation.
    async fn cancel(&self, request: CancelRequest) -> BridgeResult<()>;

    /// List agents from the catalog (read-only, display/validation only).
    async fn list_agents(&self) -> BridgeResult<Vec<AgentInfo>>;

    /// List tools exposed by one agent.
    async fn list_tools(&self, agent_id: &str) -> BridgeResult<Vec<ToolInfo>>;
}

/// HTTP client for the bridge control plane.
#[derive(Debug, Clone)]
pub struct HttpControlApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpControlApi {
    /// Create a client for the given base URL with an optional bearer token.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Parse a success body or map the status to an API error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> BridgeResult<T> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            Err(api_error(status, response).await)
        }
    }
}

async fn api_error(status: StatusCode, response: reqwest::Response) -> BridgeError {
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    BridgeError::Api {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl ControlApi for HttpControlApi {
    async fn invoke(&self, request: InvokeRequest) -> BridgeResult<InvokeResponse> {
        let url = format!("{}/bridge/invoke", self.base_url);
        let response = self
            .request(self.client.post(&url))
            .json(&request)
            .send()
            .await?;
        self.handle_response(response).await
    }

    async fn cancel(&self, request: CancelRequest) -> BridgeResult<()> {
        let url = format!("{}/bridge/cancel", self.base_url);
        let response = self
            .request(self.client.post(&url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        // Unknown ids are a success per protocol: cancel is idempotent.
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(api_error(status, response).await)
        }
    }

    async fn list_agents(&self) -> BridgeResult<Vec<AgentInfo>> {
        let url = format!("{}/bridge/agents", self.base_url);
        let response = self.request(self.client.get(&url)).send().await?;
        self.handle_response(response).await
    }

    async fn list_tools(&self, agent_id: &str) -> BridgeResult<Vec<ToolInfo>> {
        let url = format!("{}/bridge/agents/{}/tools", self.base_url, agent_id);
        let response = self.request(self.client.get(&url)).send().await?;
        self.handle_response(response).await
    }
}
