//! In-memory farm implementing every external collaborator.
//!
//! One [`MockFarm`] plays the deployment endpoint, the status endpoint, the
//! management controller and the service facade of all hosts at once, so
//! deploys, probes, container specs and clients observe the same state.
//!
//! Time is read from `tokio::time`, which makes boot delays free under a
//! paused test runtime.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use farm_id::{ContainerId, NodeRole, TemplateId};
use tokio::time::Instant;
use tracing::debug;

use crate::client::{ClientFactory, ConnectError};
use crate::deployer::{ArtifactDeployer, DeployResult};
use crate::error::HarnessError;
use crate::management::{DeleteOutcome, ManagementApi};
use crate::probe::{NodeStatusReport, ProbeError, StatusProbe};
use crate::topology::{ArtifactRef, NodeSpec};

#[derive(Debug, Default)]
struct MockHost {
    deployed_at: Option<Instant>,
    /// Deployed before the harness started; skips the boot delay.
    predeployed: bool,
    boot_delay: Duration,
    shutdown_delay: Duration,
    undeployed_at: Option<Instant>,
    sync_lag: Duration,
    reject: Option<String>,
    hang: bool,
    failing_probes: u32,
    failing_connects: u32,
    deploys: u32,
    undeploys: u32,
    probes: u32,
    connects: u32,
}

impl MockHost {
    fn ready_at(&self) -> Option<Instant> {
        if self.hang {
            return None;
        }
        let delay = if self.predeployed {
            Duration::ZERO
        } else {
            self.boot_delay
        };
        self.deployed_at.map(|at| at + delay)
    }

    fn is_ready(&self, now: Instant) -> bool {
        self.ready_at().is_some_and(|at| now >= at)
    }

    /// Still answering after an undeploy until the shutdown delay passes.
    fn is_draining(&self, now: Instant) -> bool {
        self.undeployed_at
            .is_some_and(|at| self.hang || now < at + self.shutdown_delay)
    }
}

#[derive(Debug, Default)]
struct FarmState {
    hosts: HashMap<NodeRole, MockHost>,
    templates: BTreeMap<TemplateId, BTreeMap<ContainerId, Instant>>,
    failing_deletes: u32,
}

impl FarmState {
    fn host(&mut self, role: &NodeRole) -> &mut MockHost {
        self.hosts.entry(role.clone()).or_default()
    }

    /// Containers a ready host has picked up by `now`.
    fn container_count(&self, host: &MockHost, now: Instant) -> u32 {
        let Some(ready_at) = host.ready_at() else {
            return 0;
        };
        self.templates
            .values()
            .flat_map(|specs| specs.values())
            .filter(|added_at| now >= (**added_at).max(ready_at) + host.sync_lag)
            .count() as u32
    }
}

/// Client handed out by [`MockFarm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockClient {
    pub role: NodeRole,
    /// Connect sequence number on this host.
    pub serial: u32,
}

/// Shared in-memory farm.
#[derive(Debug, Default)]
pub struct MockFarm {
    state: Mutex<FarmState>,
}

impl MockFarm {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FarmState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark a host as already serving the facade.
    pub fn mark_deployed(&self, role: &NodeRole) {
        let mut state = self.lock();
        let host = state.host(role);
        host.deployed_at = Some(Instant::now());
        host.predeployed = true;
        host.undeployed_at = None;
    }

    /// Time between an accepted deploy and the facade reporting ready.
    pub fn set_boot_delay(&self, role: &NodeRole, delay: Duration) {
        self.lock().host(role).boot_delay = delay;
    }

    /// Time between an accepted undeploy and the facade going away.
    pub fn set_shutdown_delay(&self, role: &NodeRole, delay: Duration) {
        self.lock().host(role).shutdown_delay = delay;
    }

    /// Time a ready host needs to pick up a container spec.
    pub fn set_sync_lag(&self, role: &NodeRole, lag: Duration) {
        self.lock().host(role).sync_lag = lag;
    }

    /// Reject every deploy and undeploy with `reason`.
    pub fn reject_deploys(&self, role: &NodeRole, reason: impl Into<String>) {
        self.lock().host(role).reject = Some(reason.into());
    }

    /// Host never finishes booting or shutting down.
    pub fn hang(&self, role: &NodeRole) {
        self.lock().host(role).hang = true;
    }

    /// Fail the next `count` probes with a transient error.
    pub fn fail_probes(&self, role: &NodeRole, count: u32) {
        self.lock().host(role).failing_probes = count;
    }

    /// Fail the next `count` client connects.
    pub fn fail_connects(&self, role: &NodeRole, count: u32) {
        self.lock().host(role).failing_connects = count;
    }

    /// Fail the next `count` container spec deletions.
    pub fn fail_deletes(&self, count: u32) {
        self.lock().failing_deletes = count;
    }

    /// Create a container spec; ready hosts pick it up after their sync lag.
    pub fn add_container_spec(&self, template: &TemplateId, container: &ContainerId) {
        self.lock()
            .templates
            .entry(template.clone())
            .or_default()
            .insert(container.clone(), Instant::now());
    }

    /// Register a server template with no container specs.
    pub fn add_template(&self, template: &TemplateId) {
        self.lock().templates.entry(template.clone()).or_default();
    }

    pub fn container_spec_count(&self) -> usize {
        self.lock().templates.values().map(BTreeMap::len).sum()
    }

    pub fn deploy_count(&self, role: &NodeRole) -> u32 {
        self.lock().hosts.get(role).map_or(0, |h| h.deploys)
    }

    pub fn undeploy_count(&self, role: &NodeRole) -> u32 {
        self.lock().hosts.get(role).map_or(0, |h| h.undeploys)
    }

    pub fn probe_count(&self, role: &NodeRole) -> u32 {
        self.lock().hosts.get(role).map_or(0, |h| h.probes)
    }

    pub fn connect_count(&self, role: &NodeRole) -> u32 {
        self.lock().hosts.get(role).map_or(0, |h| h.connects)
    }

    /// Whether the facade is currently deployed on the host.
    pub fn is_deployed(&self, role: &NodeRole) -> bool {
        self.lock()
            .hosts
            .get(role)
            .is_some_and(|h| h.deployed_at.is_some())
    }
}

#[async_trait]
impl ArtifactDeployer for MockFarm {
    async fn deploy(&self, node: &NodeSpec, artifact: &ArtifactRef) -> DeployResult {
        let mut state = self.lock();
        let host = state.host(&node.role);
        host.deploys += 1;

        if let Some(reason) = &host.reject {
            return DeployResult::rejected(reason.clone());
        }

        debug!(role = %node.role, context = %artifact.context, "[MOCK] Deploying facade");
        host.deployed_at = Some(Instant::now());
        host.predeployed = false;
        host.undeployed_at = None;
        DeployResult::Accepted
    }

    async fn undeploy(&self, node: &NodeSpec, artifact: &ArtifactRef) -> DeployResult {
        let mut state = self.lock();
        let host = state.host(&node.role);
        host.undeploys += 1;

        if let Some(reason) = &host.reject {
            return DeployResult::rejected(reason.clone());
        }

        debug!(role = %node.role, context = %artifact.context, "[MOCK] Undeploying facade");
        if host.deployed_at.is_some() {
            host.undeployed_at = Some(Instant::now());
        }
        DeployResult::Accepted
    }
}

#[async_trait]
impl StatusProbe for MockFarm {
    async fn probe(&self, node: &NodeSpec) -> Result<NodeStatusReport, ProbeError> {
        let now = Instant::now();
        let mut state = self.lock();
        let host = state.host(&node.role);
        host.probes += 1;

        if host.failing_probes > 0 {
            host.failing_probes -= 1;
            return Err(ProbeError::Transient("connection reset by peer".to_string()));
        }

        if host.undeployed_at.is_some() && !host.is_draining(now) {
            host.deployed_at = None;
            host.undeployed_at = None;
        }
        if host.deployed_at.is_none() {
            return Err(ProbeError::Absent("404 Not Found".to_string()));
        }

        let ready = host.is_ready(now);
        let host = state.hosts.get(&node.role);
        let containers = host.map_or(0, |h| state.container_count(h, now));
        Ok(NodeStatusReport::new(ready, if ready { containers } else { 0 }))
    }
}

#[async_trait]
impl ManagementApi for MockFarm {
    async fn list_server_templates(&self) -> Result<Vec<TemplateId>, HarnessError> {
        Ok(self.lock().templates.keys().cloned().collect())
    }

    async fn list_container_specs(
        &self,
        template: &TemplateId,
    ) -> Result<Vec<ContainerId>, HarnessError> {
        Ok(self
            .lock()
            .templates
            .get(template)
            .map(|specs| specs.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_container_spec(
        &self,
        template: &TemplateId,
        container: &ContainerId,
    ) -> Result<DeleteOutcome, HarnessError> {
        let mut state = self.lock();
        if state.failing_deletes > 0 {
            state.failing_deletes -= 1;
            return Err(HarnessError::cleanup(template, "500 Internal Server Error"));
        }

        let removed = state
            .templates
            .get_mut(template)
            .and_then(|specs| specs.remove(container));
        Ok(match removed {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::AlreadyAbsent,
        })
    }
}

#[async_trait]
impl ClientFactory for MockFarm {
    type Client = MockClient;

    async fn connect(&self, node: &NodeSpec) -> Result<MockClient, ConnectError> {
        let now = Instant::now();
        let mut state = self.lock();
        let host = state.host(&node.role);
        host.connects += 1;

        if host.failing_connects > 0 {
            host.failing_connects -= 1;
            return Err(ConnectError::Request("connection refused".to_string()));
        }
        if !host.is_ready(now) || host.undeployed_at.is_some() {
            return Err(ConnectError::Status {
                status: 404,
                message: "service facade not registered".to_string(),
            });
        }

        Ok(MockClient {
            role: node.role.clone(),
            serial: host.connects,
        })
    }
}
