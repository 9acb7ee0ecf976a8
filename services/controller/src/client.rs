//! Clients bound to a node's service API.
//!
//! The service wraps every answer in an envelope:
//!
//! ```text
//! { "type": "SUCCESS" | "FAILURE", "msg": "...", "result": { ... } }
//! ```
//!
//! A client only counts as constructed once the server info call succeeds,
//! which proves the facade is registered and answering.

use std::time::Duration;

use async_trait::async_trait;
use farm_id::{ContainerId, NodeRole};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::management::{Credentials, DeleteOutcome};
use crate::node::NodeState;
use crate::topology::NodeSpec;

/// Why a client could not be built or a call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("node is {0}, not up")]
    NodeNotUp(NodeState),

    #[error("node went through another lifecycle while connecting")]
    Superseded,

    #[error("request failed: {0}")]
    Request(String),

    #[error("server answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("service reported failure: {0}")]
    Failure(String),
}

/// Builds clients for a node.
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    type Client: Send + Sync + 'static;

    /// Build and verify a client. Must fail rather than hand out a client
    /// the node cannot serve yet.
    async fn connect(&self, node: &NodeSpec) -> Result<Self::Client, ConnectError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum ResponseType {
    Success,
    Failure,
}

#[derive(Debug, Deserialize)]
struct ServiceResponse<T> {
    #[serde(rename = "type")]
    kind: ResponseType,
    #[serde(default)]
    msg: String,
    result: Option<T>,
}

/// Server identity returned by the service root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// One deployed container as seen by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub container_id: ContainerId,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContainerList {
    #[serde(default)]
    containers: Vec<ContainerSummary>,
}

/// HTTP client bound to one node's service facade.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    client: reqwest::Client,
    base_url: String,
    role: NodeRole,
    credentials: Option<Credentials>,
}

impl ServiceClient {
    pub fn role(&self) -> &NodeRole {
        &self.role
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.credentials {
            Some(c) => builder.basic_auth(&c.username, c.password.as_deref()),
            None => builder,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
    ) -> Result<Option<T>, ConnectError> {
        let response = self
            .request(method, url)
            .send()
            .await
            .map_err(|e| ConnectError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(role = %self.role, url = %url, status = %status, body = %body, "Service call failed");
            return Err(ConnectError::Status {
                status: status.as_u16(),
                message: body,
            });
        }

        let envelope: ServiceResponse<T> = response
            .json()
            .await
            .map_err(|e| ConnectError::Request(format!("invalid body: {e}")))?;

        match envelope.kind {
            ResponseType::Success => Ok(envelope.result),
            ResponseType::Failure => Err(ConnectError::Failure(envelope.msg)),
        }
    }

    /// Fetch server identity.
    pub async fn server_info(&self) -> Result<ServerInfo, ConnectError> {
        self.call(reqwest::Method::GET, &self.base_url)
            .await?
            .ok_or_else(|| ConnectError::Failure("server info missing from response".to_string()))
    }

    /// List containers deployed on this node.
    pub async fn list_containers(&self) -> Result<Vec<ContainerSummary>, ConnectError> {
        let url = format!("{}/containers", self.base_url);
        let list: Option<ContainerList> = self.call(reqwest::Method::GET, &url).await?;
        Ok(list.map(|l| l.containers).unwrap_or_default())
    }

    /// Dispose a container on this node. A missing container is not an error.
    pub async fn dispose_container(&self, id: &ContainerId) -> Result<DeleteOutcome, ConnectError> {
        let url = format!("{}/containers/{}", self.base_url, id);
        debug!(role = %self.role, container = %id, "Disposing container");

        match self
            .call::<serde_json::Value>(reqwest::Method::DELETE, &url)
            .await
        {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(ConnectError::Status { status: 404, .. }) => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) => Err(e),
        }
    }
}

/// Builds [`ServiceClient`]s and verifies them with a server info call.
pub struct HttpClientFactory {
    request_timeout: Duration,
    credentials: Option<Credentials>,
}

impl HttpClientFactory {
    pub fn new(request_timeout: Duration, credentials: Option<Credentials>) -> Self {
        Self {
            request_timeout,
            credentials,
        }
    }
}

#[async_trait]
impl ClientFactory for HttpClientFactory {
    type Client = ServiceClient;

    async fn connect(&self, node: &NodeSpec) -> Result<ServiceClient, ConnectError> {
        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| ConnectError::Request(e.to_string()))?;

        let service = ServiceClient {
            client,
            base_url: node.url.trim_end_matches('/').to_string(),
            role: node.role.clone(),
            credentials: self.credentials.clone(),
        };

        let info = service.server_info().await?;
        debug!(role = %node.role, server_id = %info.id, "Service client connected");

        Ok(service)
    }
}
