//! Harness configuration.
//!
//! Loaded from a TOML file, then overridden from `FARM_*` environment
//! variables:
//!
//! ```toml
//! [timeouts]
//! lifecycle_secs = 60
//! poll_interval_ms = 200
//!
//! [controller]
//! url = "http://controller:8080/kie-server-controller/rest"
//! username = "admin"
//!
//! [[nodes]]
//! role = "primary"
//! host = "host-a"
//! url = "http://host-a:8080/kie-server-services/services/rest/server"
//! management_url = "http://host-a:9990"
//! artifact = "file:///opt/kie-server.war"
//! context = "kie-server-services"
//! initially_deployed = true
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use farm_id::NodeRole;
use farm_poll::PollSettings;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::HarnessError;
use crate::management::Credentials;
use crate::topology::{ArtifactRef, NodeSpec};

/// Budgets and cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Budget of one turn-on, turn-off or verify.
    pub lifecycle_secs: u64,
    /// Budget of one client construction.
    pub client_secs: u64,
    /// Budget of one synchronization wait.
    pub sync_secs: u64,
    /// Budget of the post-reset wait for empty nodes.
    pub reset_secs: u64,
    /// Pause between probes.
    pub poll_interval_ms: u64,
    /// Timeout of one HTTP request.
    pub probe_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            lifecycle_secs: 60,
            client_secs: 30,
            sync_secs: 30,
            reset_secs: 30,
            poll_interval_ms: 200,
            probe_timeout_ms: 5_000,
        }
    }
}

/// Management controller endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    pub url: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResetConfig {
    /// Wait for every Up node to report zero containers after a reset.
    pub await_empty: bool,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self { await_empty: true }
    }
}

/// One `[[nodes]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub role: NodeRole,
    pub host: String,
    pub url: String,
    pub management_url: String,
    pub artifact: String,
    pub context: String,
    #[serde(default)]
    pub initially_deployed: bool,
}

/// Complete harness configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub reset: ResetConfig,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

impl HarnessConfig {
    /// Read, override from the environment and validate.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let mut config = Self::from_toml_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.apply_env();
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, HarnessError> {
        toml::from_str(raw).map_err(|e| HarnessError::Config(e.to_string()))
    }

    /// Apply `FARM_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Unparsable numbers are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let number = |key: &str| -> Option<u64> {
            let value = lookup(key)?;
            match value.parse() {
                Ok(n) => Some(n),
                Err(_) => {
                    warn!(key, value = %value, "Ignoring unparsable override");
                    None
                }
            }
        };

        if let Some(secs) = number("FARM_LIFECYCLE_TIMEOUT_SECS") {
            self.timeouts.lifecycle_secs = secs;
        }
        if let Some(ms) = number("FARM_POLL_INTERVAL_MS") {
            self.timeouts.poll_interval_ms = ms;
        }
        if let Some(url) = lookup("FARM_CONTROLLER_URL") {
            self.controller.url = url;
        }
        if let Some(username) = lookup("FARM_USERNAME") {
            self.controller.username = Some(username);
        }
        if let Some(password) = lookup("FARM_PASSWORD") {
            self.controller.password = Some(password);
        }
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.nodes.is_empty() {
            return Err(HarnessError::Config("at least one node is required".to_string()));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(&node.role) {
                return Err(HarnessError::Config(format!(
                    "duplicate node role '{}'",
                    node.role
                )));
            }
            if node.url.is_empty() || node.management_url.is_empty() {
                return Err(HarnessError::Config(format!(
                    "node '{}' needs both url and management_url",
                    node.role
                )));
            }
        }

        if self.controller.url.is_empty() {
            return Err(HarnessError::Config(
                "controller url is required (set [controller] url or FARM_CONTROLLER_URL)"
                    .to_string(),
            ));
        }

        let t = &self.timeouts;
        if t.poll_interval_ms == 0 {
            return Err(HarnessError::Config("poll_interval_ms must be non-zero".to_string()));
        }
        if t.probe_timeout_ms == 0 {
            return Err(HarnessError::Config("probe_timeout_ms must be non-zero".to_string()));
        }
        for (name, secs) in [
            ("lifecycle_secs", t.lifecycle_secs),
            ("client_secs", t.client_secs),
            ("sync_secs", t.sync_secs),
            ("reset_secs", t.reset_secs),
        ] {
            if t.poll_interval_ms >= secs.saturating_mul(1000) {
                return Err(HarnessError::Config(format!(
                    "poll_interval_ms ({}) must be shorter than {name} ({secs}s)",
                    t.poll_interval_ms
                )));
            }
        }

        Ok(())
    }

    fn settings(&self, secs: u64) -> PollSettings {
        PollSettings::new(
            Duration::from_secs(secs),
            Duration::from_millis(self.timeouts.poll_interval_ms),
        )
    }

    pub fn lifecycle_settings(&self) -> PollSettings {
        self.settings(self.timeouts.lifecycle_secs)
    }

    pub fn client_settings(&self) -> PollSettings {
        self.settings(self.timeouts.client_secs)
    }

    pub fn sync_settings(&self) -> PollSettings {
        self.settings(self.timeouts.sync_secs)
    }

    pub fn reset_settings(&self) -> PollSettings {
        self.settings(self.timeouts.reset_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.probe_timeout_ms)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.controller.username.as_ref().map(|username| Credentials {
            username: username.clone(),
            password: self.controller.password.clone(),
        })
    }

    pub fn node_specs(&self) -> Vec<NodeSpec> {
        self.nodes
            .iter()
            .map(|n| NodeSpec {
                role: n.role.clone(),
                host: n.host.clone(),
                url: n.url.clone(),
                management_url: n.management_url.clone(),
                artifact: ArtifactRef {
                    locator: n.artifact.clone(),
                    context: n.context.clone(),
                },
                initially_deployed: n.initially_deployed,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const TWO_NODES: &str = r#"
[timeouts]
lifecycle_secs = 45
poll_interval_ms = 250

[controller]
url = "http://controller:8080/rest"
username = "admin"
password = "admin1!"

[[nodes]]
role = "primary"
host = "host-a"
url = "http://host-a:8080/server"
management_url = "http://host-a:9990"
artifact = "file:///opt/facade.war"
context = "kie-server-services"
initially_deployed = true

[[nodes]]
role = "secondary"
host = "host-b"
url = "http://host-b:8080/server"
management_url = "http://host-b:9990"
artifact = "file:///opt/facade.war"
context = "kie-server-services"
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = HarnessConfig::from_toml_str(TWO_NODES).unwrap();
        config.validate().unwrap();

        assert_eq!(config.timeouts.lifecycle_secs, 45);
        assert_eq!(config.timeouts.sync_secs, 30);
        assert!(config.reset.await_empty);
        assert_eq!(config.nodes.len(), 2);

        let specs = config.node_specs();
        assert!(specs[0].initially_deployed);
        assert!(!specs[1].initially_deployed);
        assert_eq!(specs[1].artifact.context, "kie-server-services");

        let lifecycle = config.lifecycle_settings();
        assert_eq!(lifecycle.timeout, Duration::from_secs(45));
        assert_eq!(lifecycle.interval, Duration::from_millis(250));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = HarnessConfig::from_toml_str(TWO_NODES).unwrap();
        let env: HashMap<&str, &str> = [
            ("FARM_LIFECYCLE_TIMEOUT_SECS", "90"),
            ("FARM_POLL_INTERVAL_MS", "not-a-number"),
            ("FARM_CONTROLLER_URL", "http://other:8080/rest"),
            ("FARM_PASSWORD", "rotated"),
        ]
        .into_iter()
        .collect();

        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.timeouts.lifecycle_secs, 90);
        assert_eq!(config.timeouts.poll_interval_ms, 250);
        assert_eq!(config.controller.url, "http://other:8080/rest");
        let credentials = config.credentials().unwrap();
        assert_eq!(credentials.username, "admin");
        assert_eq!(credentials.password.as_deref(), Some("rotated"));
    }

    #[test]
    fn test_invalid_role_rejected_at_parse() {
        let raw = TWO_NODES.replace("role = \"secondary\"", "role = \"Secondary\"");
        let err = HarnessConfig::from_toml_str(&raw).unwrap_err();
        assert_eq!(err.reason_code(), "config_invalid");
    }

    #[test]
    fn test_validation_failures() {
        let mut config = HarnessConfig::from_toml_str(TWO_NODES).unwrap();
        config.nodes[1].role = config.nodes[0].role.clone();
        assert!(config.validate().unwrap_err().to_string().contains("duplicate"));

        let mut config = HarnessConfig::from_toml_str(TWO_NODES).unwrap();
        config.timeouts.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::from_toml_str(TWO_NODES).unwrap();
        config.timeouts.poll_interval_ms = 40_000;
        assert!(config.validate().unwrap_err().to_string().contains("client_secs"));

        let mut config = HarnessConfig::from_toml_str(TWO_NODES).unwrap();
        config.timeouts.probe_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.reason_code(), "config_invalid");
        assert!(err.to_string().contains("probe_timeout_ms"));

        let mut config = HarnessConfig::from_toml_str(TWO_NODES).unwrap();
        config.controller.url.clear();
        assert!(config.validate().is_err());

        assert!(HarnessConfig::default().validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TWO_NODES.as_bytes()).unwrap();

        let config = HarnessConfig::load(file.path()).unwrap();
        assert_eq!(config.nodes[0].role.as_str(), "primary");
    }

    #[test]
    fn test_load_missing_file_has_context() {
        let err = HarnessConfig::load(Path::new("/nonexistent/cluster.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/cluster.toml"));
    }
}
