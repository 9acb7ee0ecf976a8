//! Static description of cluster members.

use farm_id::NodeRole;
use serde::Serialize;

/// Deployable service facade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    /// Where the management endpoint fetches the archive from.
    pub locator: String,
    /// Context root the facade is deployed under.
    pub context: String,
}

/// One logical cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSpec {
    pub role: NodeRole,
    /// Host the node runs on, for logs and diagnostics.
    pub host: String,
    /// Base URL of the service facade.
    pub url: String,
    /// Base URL of the host's deployment management endpoint.
    pub management_url: String,
    pub artifact: ArtifactRef,
    /// Node is expected to be deployed before the harness starts.
    pub initially_deployed: bool,
}

impl NodeSpec {
    /// URL of the status endpoint.
    pub fn state_url(&self) -> String {
        format!("{}/state", self.url.trim_end_matches('/'))
    }

    /// URL of this node's deployment on the management endpoint.
    pub fn deployment_url(&self) -> String {
        format!(
            "{}/deployments/{}",
            self.management_url.trim_end_matches('/'),
            self.artifact.context
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_ignore_trailing_slash() {
        let spec = NodeSpec {
            role: NodeRole::parse("primary").unwrap(),
            host: "host-a".to_string(),
            url: "http://host-a:8080/services/rest/server/".to_string(),
            management_url: "http://host-a:9990/".to_string(),
            artifact: ArtifactRef {
                locator: "file:///opt/facade.war".to_string(),
                context: "kie-server-services".to_string(),
            },
            initially_deployed: false,
        };

        assert_eq!(
            spec.state_url(),
            "http://host-a:8080/services/rest/server/state"
        );
        assert_eq!(
            spec.deployment_url(),
            "http://host-a:9990/deployments/kie-server-services"
        );
    }
}
