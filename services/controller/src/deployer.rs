//! Artifact deployment on a node's management endpoint.
//!
//! A deploy or undeploy only submits the request. Whether the service
//! facade actually came up (or went away) is established separately by
//! polling the node's status endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::HarnessError;
use crate::topology::{ArtifactRef, NodeSpec};

/// Result of submitting a deploy or undeploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployResult {
    Accepted,
    Rejected { reason: String },
}

impl DeployResult {
    pub fn rejected(reason: impl Into<String>) -> Self {
        DeployResult::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, DeployResult::Accepted)
    }
}

/// Pushes and removes the service facade on a host.
///
/// Implementations never retry; the caller decides what a rejection means.
#[async_trait]
pub trait ArtifactDeployer: Send + Sync {
    async fn deploy(&self, node: &NodeSpec, artifact: &ArtifactRef) -> DeployResult;

    async fn undeploy(&self, node: &NodeSpec, artifact: &ArtifactRef) -> DeployResult;
}

#[derive(Debug, Serialize)]
struct DeployRequest<'a> {
    artifact: &'a str,
}

/// Deployer talking to the host's management REST endpoint.
pub struct HttpDeployer {
    client: reqwest::Client,
}

impl HttpDeployer {
    /// Create a deployer whose requests are bounded by `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self, HarnessError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactDeployer for HttpDeployer {
    async fn deploy(&self, node: &NodeSpec, artifact: &ArtifactRef) -> DeployResult {
        let url = node.deployment_url();
        debug!(role = %node.role, url = %url, locator = %artifact.locator, "Submitting deploy");

        let request = DeployRequest {
            artifact: &artifact.locator,
        };
        let response = match self.client.put(&url).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(role = %node.role, error = %e, "Deploy request failed");
                return DeployResult::rejected(format!("deploy request failed: {e}"));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(role = %node.role, status = %status, body = %body, "Deploy rejected");
            return DeployResult::rejected(format!("{status} - {body}"));
        }

        DeployResult::Accepted
    }

    async fn undeploy(&self, node: &NodeSpec, artifact: &ArtifactRef) -> DeployResult {
        let url = node.deployment_url();
        debug!(role = %node.role, url = %url, context = %artifact.context, "Submitting undeploy");

        let response = match self.client.delete(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(role = %node.role, error = %e, "Undeploy request failed");
                return DeployResult::rejected(format!("undeploy request failed: {e}"));
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(role = %node.role, "Artifact already absent");
            return DeployResult::Accepted;
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(role = %node.role, status = %status, body = %body, "Undeploy rejected");
            return DeployResult::rejected(format!("{status} - {body}"));
        }

        DeployResult::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_id::NodeRole;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn node(management_url: &str) -> NodeSpec {
        NodeSpec {
            role: NodeRole::parse("primary").unwrap(),
            host: "localhost".to_string(),
            url: "http://127.0.0.1:1/server".to_string(),
            management_url: management_url.to_string(),
            artifact: ArtifactRef {
                locator: "file:///opt/facade.war".to_string(),
                context: "kie-server-services".to_string(),
            },
            initially_deployed: false,
        }
    }

    fn deployer() -> HttpDeployer {
        HttpDeployer::new(Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_deploy_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/deployments/kie-server-services"))
            .and(body_json(serde_json::json!({ "artifact": "file:///opt/facade.war" })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let spec = node(&server.uri());
        let result = deployer().deploy(&spec, &spec.artifact).await;

        assert_eq!(result, DeployResult::Accepted);
    }

    #[tokio::test]
    async fn test_deploy_rejected_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(409).set_body_string("duplicate context"))
            .mount(&server)
            .await;

        let spec = node(&server.uri());
        let result = deployer().deploy(&spec, &spec.artifact).await;

        match result {
            DeployResult::Rejected { reason } => {
                assert!(reason.contains("409"));
                assert!(reason.contains("duplicate context"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undeploy_missing_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/deployments/kie-server-services"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let spec = node(&server.uri());
        let result = deployer().undeploy(&spec, &spec.artifact).await;

        assert!(result.is_accepted());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_rejected() {
        let spec = node("http://127.0.0.1:1");
        let result = deployer().deploy(&spec, &spec.artifact).await;

        assert!(!result.is_accepted());
    }
}
