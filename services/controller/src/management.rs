//! Management controller REST surface.
//!
//! Container specs live on the management controller, grouped by server
//! template. Every node attached to a template runs the containers its
//! specs describe, so deleting a spec is how the cluster gets emptied.

use std::time::Duration;

use async_trait::async_trait;
use farm_id::{ContainerId, TemplateId};
use serde::Deserialize;
use tracing::{debug, error};

use crate::error::HarnessError;

/// Result of deleting one container spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Already gone (404).
    AlreadyAbsent,
}

#[async_trait]
pub trait ManagementApi: Send + Sync {
    async fn list_server_templates(&self) -> Result<Vec<TemplateId>, HarnessError>;

    async fn list_container_specs(
        &self,
        template: &TemplateId,
    ) -> Result<Vec<ContainerId>, HarnessError>;

    async fn delete_container_spec(
        &self,
        template: &TemplateId,
        container: &ContainerId,
    ) -> Result<DeleteOutcome, HarnessError>;
}

/// Credentials for basic auth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TemplateList {
    #[serde(rename = "server-template", default)]
    templates: Vec<TemplateSummary>,
}

#[derive(Debug, Deserialize)]
struct TemplateSummary {
    #[serde(rename = "server-id")]
    id: TemplateId,
}

#[derive(Debug, Deserialize)]
struct ContainerSpecList {
    #[serde(rename = "container-spec", default)]
    specs: Vec<ContainerSpecSummary>,
}

#[derive(Debug, Deserialize)]
struct ContainerSpecSummary {
    #[serde(rename = "container-id")]
    id: ContainerId,
}

/// Management client over HTTP.
pub struct HttpManagementApi {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl HttpManagementApi {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Option<Credentials>,
        request_timeout: Duration,
    ) -> Result<Self, HarnessError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
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

    fn servers_url(&self) -> String {
        format!("{}/management/servers", self.base_url)
    }
}

#[async_trait]
impl ManagementApi for HttpManagementApi {
    async fn list_server_templates(&self) -> Result<Vec<TemplateId>, HarnessError> {
        let url = self.servers_url();
        debug!(url = %url, "Listing server templates");

        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| HarnessError::Cleanup {
                target: "server templates".to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Failed to list server templates");
            return Err(HarnessError::Cleanup {
                target: "server templates".to_string(),
                reason: format!("{status} - {body}"),
            });
        }

        let list: TemplateList = response.json().await.map_err(|e| HarnessError::Cleanup {
            target: "server templates".to_string(),
            reason: format!("invalid body: {e}"),
        })?;

        Ok(list.templates.into_iter().map(|t| t.id).collect())
    }

    async fn list_container_specs(
        &self,
        template: &TemplateId,
    ) -> Result<Vec<ContainerId>, HarnessError> {
        let url = format!("{}/{}/containers", self.servers_url(), template);
        debug!(template = %template, url = %url, "Listing container specs");

        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| HarnessError::cleanup(template, e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(template = %template, status = %status, body = %body, "Failed to list container specs");
            return Err(HarnessError::cleanup(template, format!("{status} - {body}")));
        }

        let list: ContainerSpecList = response
            .json()
            .await
            .map_err(|e| HarnessError::cleanup(template, format!("invalid body: {e}")))?;

        Ok(list.specs.into_iter().map(|s| s.id).collect())
    }

    async fn delete_container_spec(
        &self,
        template: &TemplateId,
        container: &ContainerId,
    ) -> Result<DeleteOutcome, HarnessError> {
        let url = format!("{}/{}/containers/{}", self.servers_url(), template, container);
        debug!(template = %template, container = %container, "Deleting container spec");

        let response = self
            .request(reqwest::Method::DELETE, &url)
            .send()
            .await
            .map_err(|e| HarnessError::cleanup(template, e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::AlreadyAbsent);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                template = %template,
                container = %container,
                status = %status,
                body = %body,
                "Failed to delete container spec"
            );
            return Err(HarnessError::Cleanup {
                target: format!("container spec '{container}' of server template '{template}'"),
                reason: format!("{status} - {body}"),
            });
        }

        Ok(DeleteOutcome::Deleted)
    }
}
