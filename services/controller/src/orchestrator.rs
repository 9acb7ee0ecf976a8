//! Cluster-level coordination.
//!
//! The orchestrator is the surface scenarios talk to:
//! - Lifecycle of single nodes and of several nodes at once
//! - Client access through the [`ClientRegistry`]
//! - Waiting until a set of nodes agrees on the deployed container count
//! - Resetting the cluster to zero container specs between scenarios

use std::collections::BTreeMap;
use std::sync::Arc;

use farm_id::{NodeRole, ScenarioId};
use farm_poll::{PollOutcome, PollSettings, ReadinessPoller};
use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::client::{ClientFactory, HttpClientFactory};
use crate::config::HarnessConfig;
use crate::deployer::HttpDeployer;
use crate::error::{HarnessError, Operation, SyncDisagreement, SyncObservation};
use crate::management::{DeleteOutcome, HttpManagementApi, ManagementApi};
use crate::node::{LifecycleReport, NodeController, NodeSnapshot, NodeState};
use crate::probe::{HttpStatusProbe, ProbeError, ProbeObservation};
use crate::registry::{ClientHandle, ClientRegistry};
use crate::view::ClusterView;

/// Budgets used by the orchestrator itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub client: PollSettings,
    pub sync: PollSettings,
    pub reset: PollSettings,
    /// Wait for Up nodes to report zero containers after a reset.
    pub await_empty: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            client: PollSettings::default(),
            sync: PollSettings::default(),
            reset: PollSettings::default(),
            await_empty: true,
        }
    }
}

/// Result of a successful synchronization wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub expected: u32,
    pub roles: Vec<NodeRole>,
    pub elapsed: std::time::Duration,
    pub attempts: u32,
}

/// What a reset removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    pub templates: usize,
    pub deleted: usize,
    /// Specs that were already gone when deleted (404).
    pub already_absent: usize,
}

/// One row of [`ClusterOrchestrator::status`].
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub role: NodeRole,
    pub host: String,
    pub snapshot: NodeSnapshot,
    pub probe: PollOutcome<ProbeObservation>,
}

/// Coordinates the nodes of one cluster.
pub struct ClusterOrchestrator<F: ClientFactory> {
    view: Arc<ClusterView>,
    registry: ClientRegistry<F>,
    management: Arc<dyn ManagementApi>,
    poller: ReadinessPoller,
    settings: OrchestratorSettings,
}

impl<F: ClientFactory> ClusterOrchestrator<F> {
    pub fn new(
        view: Arc<ClusterView>,
        factory: Arc<F>,
        management: Arc<dyn ManagementApi>,
        poller: ReadinessPoller,
        settings: OrchestratorSettings,
    ) -> Self {
        let registry = ClientRegistry::new(
            Arc::clone(&view),
            factory,
            poller.clone(),
            settings.client,
        );

        Self {
            view,
            registry,
            management,
            poller,
            settings,
        }
    }

    pub fn view(&self) -> &ClusterView {
        &self.view
    }

    pub fn registry(&self) -> &ClientRegistry<F> {
        &self.registry
    }

    pub fn node(&self, role: &NodeRole) -> Result<&Arc<NodeController>, HarnessError> {
        self.view.get(role)
    }

    /// Replace every node's configured state with what one probe observes.
    ///
    /// Call once before the first lifecycle step when the orchestrator did
    /// not deploy the facades itself.
    pub async fn discover(&self) -> BTreeMap<NodeRole, NodeState> {
        join_all(
            self.view
                .iter()
                .map(|(role, node)| async move { (role.clone(), node.discover().await) }),
        )
        .await
        .into_iter()
        .collect()
    }

    /// Deploy the facade on `role` and wait for readiness.
    pub async fn turn_on(&self, role: &NodeRole) -> Result<LifecycleReport, HarnessError> {
        self.view.get(role)?.turn_on().await
    }

    /// Undeploy the facade on `role` and wait for it to disappear.
    ///
    /// The node's client is invalidated before the undeploy is submitted.
    pub async fn turn_off(&self, role: &NodeRole) -> Result<LifecycleReport, HarnessError> {
        let node = self.view.get(role)?;
        self.registry.invalidate(role);
        let result = node.turn_off().await;
        self.registry.invalidate(role);
        result
    }

    /// Turn on several nodes concurrently.
    ///
    /// Every node is driven to completion; the first error is returned.
    pub async fn turn_on_all(
        &self,
        roles: &[NodeRole],
    ) -> Result<Vec<LifecycleReport>, HarnessError> {
        let nodes = self.view.resolve(roles)?;
        let results = join_all(nodes.iter().map(|node| node.turn_on())).await;
        results.into_iter().collect()
    }

    /// Turn off several nodes concurrently.
    pub async fn turn_off_all(
        &self,
        roles: &[NodeRole],
    ) -> Result<Vec<LifecycleReport>, HarnessError> {
        self.view.resolve(roles)?;
        let results = join_all(roles.iter().map(|role| self.turn_off(role))).await;
        results.into_iter().collect()
    }

    /// Client for `role`, valid until the node is turned off.
    pub async fn get_client(&self, role: &NodeRole) -> Result<ClientHandle<F::Client>, HarnessError> {
        self.registry.get_client(role).await
    }

    /// Wait until every node in `roles` is ready and reports `expected`
    /// deployed containers.
    pub async fn wait_for_synchronization(
        &self,
        expected: u32,
        roles: &[NodeRole],
    ) -> Result<SyncReport, HarnessError> {
        self.synchronize(Operation::Synchronize, expected, roles, self.settings.sync)
            .await
    }

    async fn synchronize(
        &self,
        operation: Operation,
        expected: u32,
        roles: &[NodeRole],
        settings: PollSettings,
    ) -> Result<SyncReport, HarnessError> {
        if roles.is_empty() {
            return Err(HarnessError::Config(
                "synchronization needs at least one role".to_string(),
            ));
        }
        let nodes = self.view.resolve(roles)?;
        let nodes = &nodes;

        let started = Instant::now();
        let waited = self
            .poller
            .wait(
                move || async move {
                    let observed = observe(nodes).await;
                    if observed
                        .values()
                        .all(|o| *o == SyncObservation::Containers(expected))
                    {
                        PollOutcome::Ready(observed)
                    } else {
                        PollOutcome::NotReady(Some(observed))
                    }
                },
                settings,
            )
            .await;

        match waited {
            Ok(success) => {
                info!(
                    operation = %operation,
                    expected,
                    nodes = roles.len(),
                    attempts = success.attempts,
                    elapsed_ms = success.elapsed.as_millis() as u64,
                    "Cluster synchronized"
                );
                Ok(SyncReport {
                    expected,
                    roles: roles.to_vec(),
                    elapsed: started.elapsed(),
                    attempts: success.attempts,
                })
            }
            Err(timeout) => {
                let last = timeout.last.as_ref().and_then(PollOutcome::payload);
                let disagreeing: Vec<SyncDisagreement> = match last {
                    Some(observed) => observed
                        .iter()
                        .filter(|(_, o)| **o != SyncObservation::Containers(expected))
                        .map(|(role, o)| SyncDisagreement {
                            role: role.clone(),
                            observed: o.clone(),
                        })
                        .collect(),
                    None => roles
                        .iter()
                        .map(|role| SyncDisagreement {
                            role: role.clone(),
                            observed: SyncObservation::Unreachable(
                                "no probe completed in budget".to_string(),
                            ),
                        })
                        .collect(),
                };
                warn!(
                    operation = %operation,
                    expected,
                    attempts = timeout.attempts,
                    elapsed_ms = timeout.elapsed.as_millis() as u64,
                    disagreeing = disagreeing.len(),
                    "Synchronization timed out"
                );
                Err(HarnessError::SynchronizationTimeout {
                    operation,
                    expected,
                    elapsed: started.elapsed(),
                    attempts: timeout.attempts,
                    disagreeing,
                })
            }
        }
    }

    /// Delete every container spec of every server template.
    ///
    /// Specs already gone count as `already_absent`. With `await_empty`,
    /// then waits for every Up node to report zero containers.
    pub async fn reset_cluster(&self) -> Result<ResetReport, HarnessError> {
        let mut report = ResetReport::default();

        let templates = self.management.list_server_templates().await?;
        report.templates = templates.len();

        for template in &templates {
            let specs = self.management.list_container_specs(template).await?;
            for container in &specs {
                match self
                    .management
                    .delete_container_spec(template, container)
                    .await?
                {
                    DeleteOutcome::Deleted => report.deleted += 1,
                    DeleteOutcome::AlreadyAbsent => {
                        debug!(template = %template, container = %container, "Container spec already absent");
                        report.already_absent += 1;
                    }
                }
            }
        }

        info!(
            templates = report.templates,
            deleted = report.deleted,
            already_absent = report.already_absent,
            "Cluster reset"
        );

        if self.settings.await_empty {
            let up: Vec<NodeRole> = self
                .view
                .iter()
                .filter(|(_, node)| node.state() == NodeState::Up)
                .map(|(role, _)| role.clone())
                .collect();
            if !up.is_empty() {
                self.synchronize(Operation::Reset, 0, &up, self.settings.reset)
                    .await?;
            }
        }

        Ok(report)
    }

    /// Bring the cluster into the starting state of a scenario.
    ///
    /// Pre-deployed nodes are verified, all others turned on, the cluster
    /// is reset, and clients are built for every node.
    pub async fn prepare_scenario(&self) -> Result<ScenarioId, HarnessError> {
        let scenario = ScenarioId::new();
        let span = info_span!("scenario", scenario = %scenario);

        async {
            info!(nodes = self.view.len(), "Preparing scenario");

            let results = join_all(self.view.iter().map(|(_, node)| async move {
                if node.state() == NodeState::Up {
                    node.verify().await
                } else {
                    node.turn_on().await
                }
            }))
            .await;
            for result in results {
                result?;
            }

            self.reset_cluster().await?;

            let roles: Vec<NodeRole> = self.view.roles().cloned().collect();
            for role in &roles {
                self.registry.get_client(role).await?;
            }

            info!("Scenario ready");
            Ok(scenario)
        }
        .instrument(span)
        .await
    }

    /// Current state and one fresh probe per node.
    pub async fn status(&self) -> Vec<NodeStatus> {
        join_all(self.view.iter().map(|(role, node)| async move {
            NodeStatus {
                role: role.clone(),
                host: node.spec().host.clone(),
                snapshot: node.snapshot(),
                probe: node.probe_once().await,
            }
        }))
        .await
    }
}

impl ClusterOrchestrator<HttpClientFactory> {
    /// Build an orchestrator talking HTTP to every collaborator.
    pub fn from_config(config: &HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;

        let request_timeout = config.request_timeout();
        let deployer = Arc::new(HttpDeployer::new(request_timeout)?);
        let probe = Arc::new(HttpStatusProbe::new(request_timeout)?);
        let poller = ReadinessPoller::new();

        let nodes = config.node_specs().into_iter().map(|spec| {
            NodeController::new(
                spec,
                deployer.clone(),
                probe.clone(),
                poller.clone(),
                config.lifecycle_settings(),
            )
        });
        let view = Arc::new(ClusterView::new(nodes)?);

        let management = Arc::new(HttpManagementApi::new(
            config.controller.url.clone(),
            config.credentials(),
            request_timeout,
        )?);
        let factory = Arc::new(HttpClientFactory::new(request_timeout, config.credentials()));

        Ok(Self::new(
            view,
            factory,
            management,
            poller,
            OrchestratorSettings {
                client: config.client_settings(),
                sync: config.sync_settings(),
                reset: config.reset_settings(),
                await_empty: config.reset.await_empty,
            },
        ))
    }
}

async fn observe(nodes: &[Arc<NodeController>]) -> BTreeMap<NodeRole, SyncObservation> {
    join_all(nodes.iter().map(|node| async move {
        let observation = match node.probe().await {
            Ok(report) if report.ready => SyncObservation::Containers(report.container_count),
            Ok(_) => SyncObservation::NotReady,
            Err(ProbeError::Absent(reason)) => SyncObservation::Absent(reason),
            Err(ProbeError::Transient(reason)) => SyncObservation::Unreachable(reason),
        };
        (node.role().clone(), observation)
    }))
    .await
    .into_iter()
    .collect()
}
