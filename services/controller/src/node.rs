//! Per-node lifecycle.
//!
//! A [`NodeController`] owns one node's observed state and drives it
//! through deploy and undeploy:
//!
//! ```text
//!            turn_on                  probe ready
//!   Down ──────────────▶ Starting ──────────────────▶ Up
//!    ▲                      │ rejected / timeout       │
//!    │                      ▼                          │ turn_off
//!    │                   Failed ◀──────────────────┐   ▼
//!    └──────────────────────────────────────────── Stopping
//!              probe absent       rejected / timeout
//! ```
//!
//! Lifecycle operations on one node are serialized by an in-flight lock.
//! A caller that waited on the lock re-reads the state before acting, so
//! concurrent `turn_on` calls result in a single deploy.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use farm_id::NodeRole;
use farm_poll::{PollOutcome, PollSettings, ReadinessPoller};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::deployer::{ArtifactDeployer, DeployResult};
use crate::error::{HarnessError, Operation};
use crate::probe::{self, NodeStatusReport, ProbeError, ProbeObservation, StatusProbe};
use crate::topology::NodeSpec;

/// Observed node state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Unknown,
    Starting,
    Up,
    Stopping,
    Down,
    Failed,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Unknown => "unknown",
            NodeState::Starting => "starting",
            NodeState::Up => "up",
            NodeState::Stopping => "stopping",
            NodeState::Down => "down",
            NodeState::Failed => "failed",
        }
    }

    /// True while a lifecycle operation is in flight.
    pub fn is_transitional(&self) -> bool {
        matches!(self, NodeState::Starting | NodeState::Stopping)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub state: NodeState,
    /// Incremented on every transition into Up.
    pub up_generation: u64,
    pub last_transition: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// What a lifecycle call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleReport {
    pub role: NodeRole,
    pub operation: Operation,
    /// False when the node already was in the target state.
    pub changed: bool,
    pub state: NodeState,
    pub elapsed: std::time::Duration,
    pub probes: u32,
}

/// Lifecycle controller for one node.
pub struct NodeController {
    spec: NodeSpec,
    deployer: Arc<dyn ArtifactDeployer>,
    probe: Arc<dyn StatusProbe>,
    poller: ReadinessPoller,
    settings: PollSettings,

    /// Held for the whole of a lifecycle operation.
    in_flight: Mutex<()>,

    state: watch::Sender<NodeSnapshot>,
}

impl NodeController {
    /// Create a controller. Pre-deployed nodes start out Up, all others Down.
    pub fn new(
        spec: NodeSpec,
        deployer: Arc<dyn ArtifactDeployer>,
        probe: Arc<dyn StatusProbe>,
        poller: ReadinessPoller,
        settings: PollSettings,
    ) -> Self {
        let (state, up_generation) = if spec.initially_deployed {
            (NodeState::Up, 1)
        } else {
            (NodeState::Down, 0)
        };

        let (tx, _rx) = watch::channel(NodeSnapshot {
            state,
            up_generation,
            last_transition: Utc::now(),
            last_error: None,
        });

        Self {
            spec,
            deployer,
            probe,
            poller,
            settings,
            in_flight: Mutex::new(()),
            state: tx,
        }
    }

    pub fn role(&self) -> &NodeRole {
        &self.spec.role
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        self.state.borrow().clone()
    }

    pub fn state(&self) -> NodeState {
        self.state.borrow().state
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<NodeSnapshot> {
        self.state.subscribe()
    }

    /// Deploy the facade and wait until the node reports ready.
    ///
    /// No-op if the node is already Up.
    pub async fn turn_on(&self) -> Result<LifecycleReport, HarnessError> {
        let _in_flight = self.in_flight.lock().await;
        let started = Instant::now();

        if self.state() == NodeState::Up {
            debug!(role = %self.spec.role, "Node already up");
            return Ok(self.unchanged(Operation::TurnOn, started));
        }

        info!(role = %self.spec.role, host = %self.spec.host, "Turning node on");
        let transition = Transition::begin(&self.state, NodeState::Starting);

        let result = self.deployer.deploy(&self.spec, &self.spec.artifact).await;
        if let DeployResult::Rejected { reason } = result {
            return Err(self.rejected(transition, Operation::TurnOn, reason, started));
        }

        self.await_outcome(transition, Operation::TurnOn, probe::liveness, started)
            .await
    }

    /// Undeploy the facade and wait until the node no longer serves it.
    ///
    /// No-op if the node is already Down.
    pub async fn turn_off(&self) -> Result<LifecycleReport, HarnessError> {
        let _in_flight = self.in_flight.lock().await;
        let started = Instant::now();

        if self.state() == NodeState::Down {
            debug!(role = %self.spec.role, "Node already down");
            return Ok(self.unchanged(Operation::TurnOff, started));
        }

        info!(role = %self.spec.role, host = %self.spec.host, "Turning node off");
        let transition = Transition::begin(&self.state, NodeState::Stopping);

        let result = self
            .deployer
            .undeploy(&self.spec, &self.spec.artifact)
            .await;
        if let DeployResult::Rejected { reason } = result {
            return Err(self.rejected(transition, Operation::TurnOff, reason, started));
        }

        self.await_outcome(transition, Operation::TurnOff, probe::absence, started)
            .await
    }

    /// Wait for readiness without deploying anything.
    pub async fn verify(&self) -> Result<LifecycleReport, HarnessError> {
        let _in_flight = self.in_flight.lock().await;
        let started = Instant::now();

        debug!(role = %self.spec.role, "Verifying node readiness");
        let transition = Transition::resume(&self.state);

        self.await_outcome(transition, Operation::Verify, probe::liveness, started)
            .await
    }

    /// Set the observed state from one probe of the host.
    ///
    /// Up when the facade reports ready, Down when it is absent. A facade
    /// that answers not ready, or a probe that fails, leaves the node
    /// Unknown so the next turn-on or turn-off acts instead of no-op'ing.
    pub async fn discover(&self) -> NodeState {
        let _in_flight = self.in_flight.lock().await;

        let outcome = self.probe_once().await;
        let (state, error) = match &outcome {
            PollOutcome::Ready(_) => (NodeState::Up, None),
            PollOutcome::NotReady(Some(ProbeObservation::Absent(_))) => (NodeState::Down, None),
            PollOutcome::NotReady(_) => (NodeState::Unknown, None),
            PollOutcome::TransientError(reason) => (NodeState::Unknown, Some(reason.clone())),
        };

        info!(
            role = %self.spec.role,
            state = %state,
            probe = outcome.label(),
            "Discovered node state"
        );
        set_state(&self.state, state, error);
        state
    }

    /// Single liveness probe, for diagnostics.
    pub async fn probe_once(&self) -> PollOutcome<ProbeObservation> {
        probe::liveness(self.probe().await)
    }

    /// Single raw probe.
    pub async fn probe(&self) -> Result<NodeStatusReport, ProbeError> {
        self.probe.probe(&self.spec).await
    }

    async fn await_outcome(
        &self,
        transition: Transition<'_>,
        operation: Operation,
        read: fn(Result<NodeStatusReport, ProbeError>) -> PollOutcome<ProbeObservation>,
        started: Instant,
    ) -> Result<LifecycleReport, HarnessError> {
        let target = match operation {
            Operation::TurnOff => NodeState::Down,
            _ => NodeState::Up,
        };

        let this = self;
        let waited = self
            .poller
            .wait(
                move || async move { read(this.probe.probe(&this.spec).await) },
                self.settings,
            )
            .await;

        match waited {
            Ok(success) => {
                transition.finish(target, None);
                info!(
                    role = %self.spec.role,
                    operation = %operation,
                    state = %target,
                    attempts = success.attempts,
                    elapsed_ms = success.elapsed.as_millis() as u64,
                    "Node transition complete"
                );
                Ok(LifecycleReport {
                    role: self.spec.role.clone(),
                    operation,
                    changed: true,
                    state: target,
                    elapsed: started.elapsed(),
                    probes: success.attempts,
                })
            }
            Err(timeout) => {
                let err = HarnessError::ReadinessTimeout {
                    node: self.spec.role.clone(),
                    operation,
                    elapsed: started.elapsed(),
                    attempts: timeout.attempts,
                    last_outcome: timeout.last,
                };
                warn!(
                    role = %self.spec.role,
                    operation = %operation,
                    attempts = timeout.attempts,
                    elapsed_ms = timeout.elapsed.as_millis() as u64,
                    "Node transition timed out"
                );
                transition.finish(NodeState::Failed, Some(err.to_string()));
                Err(err)
            }
        }
    }

    fn rejected(
        &self,
        transition: Transition<'_>,
        operation: Operation,
        reason: String,
        started: Instant,
    ) -> HarnessError {
        warn!(role = %self.spec.role, operation = %operation, reason = %reason, "Deployment rejected");
        let err = HarnessError::DeploymentRejected {
            node: self.spec.role.clone(),
            operation,
            reason,
            elapsed: started.elapsed(),
        };
        transition.finish(NodeState::Failed, Some(err.to_string()));
        err
    }

    fn unchanged(&self, operation: Operation, started: Instant) -> LifecycleReport {
        LifecycleReport {
            role: self.spec.role.clone(),
            operation,
            changed: false,
            state: self.state(),
            elapsed: started.elapsed(),
            probes: 0,
        }
    }
}

/// An in-progress transition. Dropping it unfinished marks the node Failed.
struct Transition<'a> {
    state: &'a watch::Sender<NodeSnapshot>,
    armed: bool,
}

impl<'a> Transition<'a> {
    fn begin(state: &'a watch::Sender<NodeSnapshot>, to: NodeState) -> Self {
        set_state(state, to, None);
        Self { state, armed: true }
    }

    /// Track an operation that keeps the current state until it finishes.
    fn resume(state: &'a watch::Sender<NodeSnapshot>) -> Self {
        Self { state, armed: true }
    }

    fn finish(mut self, to: NodeState, error: Option<String>) {
        self.armed = false;
        set_state(self.state, to, error);
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if self.armed {
            set_state(
                self.state,
                NodeState::Failed,
                Some("lifecycle operation cancelled".to_string()),
            );
        }
    }
}

fn set_state(state: &watch::Sender<NodeSnapshot>, to: NodeState, error: Option<String>) {
    state.send_modify(|snapshot| {
        let from = snapshot.state;
        if to == NodeState::Up && from != NodeState::Up {
            snapshot.up_generation += 1;
        }
        if from != to {
            snapshot.last_transition = Utc::now();
        }
        snapshot.state = to;
        snapshot.last_error = error;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::ArtifactRef;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    /// Deployer + probe over one flag: deployed nodes report ready after
    /// `boot_probes` probes.
    #[derive(Default)]
    struct Host {
        deployed: AtomicBool,
        probes_since_deploy: AtomicU32,
        boot_probes: u32,
        deploys: AtomicU32,
        undeploys: AtomicU32,
        reject: AtomicBool,
    }

    #[async_trait]
    impl ArtifactDeployer for Host {
        async fn deploy(&self, _node: &NodeSpec, _artifact: &ArtifactRef) -> DeployResult {
            self.deploys.fetch_add(1, Ordering::SeqCst);
            if self.reject.load(Ordering::SeqCst) {
                return DeployResult::rejected("management endpoint refused");
            }
            self.deployed.store(true, Ordering::SeqCst);
            self.probes_since_deploy.store(0, Ordering::SeqCst);
            DeployResult::Accepted
        }

        async fn undeploy(&self, _node: &NodeSpec, _artifact: &ArtifactRef) -> DeployResult {
            self.undeploys.fetch_add(1, Ordering::SeqCst);
            self.deployed.store(false, Ordering::SeqCst);
            DeployResult::Accepted
        }
    }

    #[async_trait]
    impl StatusProbe for Host {
        async fn probe(&self, _node: &NodeSpec) -> Result<NodeStatusReport, ProbeError> {
            if !self.deployed.load(Ordering::SeqCst) {
                return Err(ProbeError::Absent("404 Not Found".to_string()));
            }
            let seen = self.probes_since_deploy.fetch_add(1, Ordering::SeqCst);
            Ok(NodeStatusReport::new(seen >= self.boot_probes, 0))
        }
    }

    fn spec(initially_deployed: bool) -> NodeSpec {
        NodeSpec {
            role: NodeRole::parse("secondary").unwrap(),
            host: "host-b".to_string(),
            url: "http://host-b:8080/server".to_string(),
            management_url: "http://host-b:9990".to_string(),
            artifact: ArtifactRef {
                locator: "file:///opt/facade.war".to_string(),
                context: "kie-server-services".to_string(),
            },
            initially_deployed,
        }
    }

    fn controller(host: Arc<Host>, initially_deployed: bool) -> NodeController {
        NodeController::new(
            spec(initially_deployed),
            host.clone(),
            host,
            ReadinessPoller::new(),
            PollSettings::new(Duration::from_secs(5), Duration::from_millis(100)),
        )
    }

    #[test]
    fn test_initial_state_follows_deployment_flag() {
        let host = Arc::new(Host::default());
        assert_eq!(controller(host.clone(), false).state(), NodeState::Down);

        let up = controller(host, true);
        assert_eq!(up.state(), NodeState::Up);
        assert_eq!(up.snapshot().up_generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_overrides_configured_state() {
        let host = Arc::new(Host::default());
        host.deployed.store(true, Ordering::SeqCst);

        // Configured as not deployed, but the facade is running.
        let node = controller(host.clone(), false);
        assert_eq!(node.discover().await, NodeState::Up);
        assert_eq!(node.snapshot().up_generation, 1);

        node.turn_off().await.unwrap();
        assert_eq!(host.undeploys.load(Ordering::SeqCst), 1);

        // Configured as deployed, but nothing runs on the host.
        let stale = controller(host.clone(), true);
        assert_eq!(stale.discover().await, NodeState::Down);

        stale.turn_on().await.unwrap();
        assert_eq!(host.deploys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_leaves_booting_node_unknown() {
        let host = Arc::new(Host {
            boot_probes: 3,
            ..Host::default()
        });
        host.deployed.store(true, Ordering::SeqCst);
        let node = controller(host.clone(), true);

        assert_eq!(node.discover().await, NodeState::Unknown);

        // Unknown is not Up, so turn-on redeploys and waits.
        let report = node.turn_on().await.unwrap();
        assert!(report.changed);
        assert_eq!(host.deploys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_on_waits_for_ready() {
        let host = Arc::new(Host {
            boot_probes: 3,
            ..Host::default()
        });
        let node = controller(host.clone(), false);

        let report = node.turn_on().await.unwrap();

        assert!(report.changed);
        assert_eq!(report.state, NodeState::Up);
        assert_eq!(report.probes, 4);
        assert_eq!(node.snapshot().up_generation, 1);
        assert_eq!(host.deploys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_on_twice_deploys_once() {
        let host = Arc::new(Host::default());
        let node = controller(host.clone(), false);

        node.turn_on().await.unwrap();
        let second = node.turn_on().await.unwrap();

        assert!(!second.changed);
        assert_eq!(host.deploys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_off_waits_for_absence() {
        let host = Arc::new(Host::default());
        host.deployed.store(true, Ordering::SeqCst);
        let node = controller(host.clone(), true);

        let report = node.turn_off().await.unwrap();

        assert_eq!(report.state, NodeState::Down);
        assert_eq!(node.state(), NodeState::Down);
        assert_eq!(host.undeploys.load(Ordering::SeqCst), 1);

        let again = node.turn_off().await.unwrap();
        assert!(!again.changed);
        assert_eq!(host.undeploys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_deploy_fails_node() {
        let host = Arc::new(Host::default());
        host.reject.store(true, Ordering::SeqCst);
        let node = controller(host, false);

        let err = node.turn_on().await.unwrap_err();

        assert_eq!(err.reason_code(), "deployment_rejected");
        let snapshot = node.snapshot();
        assert_eq!(snapshot.state, NodeState::Failed);
        assert!(snapshot.last_error.unwrap().contains("management endpoint refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_timeout_fails_node() {
        let host = Arc::new(Host {
            boot_probes: u32::MAX,
            ..Host::default()
        });
        let node = controller(host, false);

        let err = node.turn_on().await.unwrap_err();

        match err {
            HarnessError::ReadinessTimeout {
                node: role,
                operation,
                elapsed,
                last_outcome,
                ..
            } => {
                assert_eq!(role.as_str(), "secondary");
                assert_eq!(operation, Operation::TurnOn);
                assert!(elapsed >= Duration::from_secs(5));
                assert_eq!(last_outcome.map(|o| o.label()), Some("not_ready"));
            }
            other => panic!("expected readiness timeout, got {other:?}"),
        }
        assert_eq!(node.state(), NodeState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_node_can_be_turned_on_again() {
        let host = Arc::new(Host::default());
        host.reject.store(true, Ordering::SeqCst);
        let node = controller(host.clone(), false);
        node.turn_on().await.unwrap_err();
        assert_eq!(node.state(), NodeState::Failed);

        host.reject.store(false, Ordering::SeqCst);
        let report = node.turn_on().await.unwrap();

        assert!(report.changed);
        assert_eq!(node.state(), NodeState::Up);
        assert_eq!(host.deploys.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_turn_on_marks_failed() {
        let host = Arc::new(Host {
            boot_probes: u32::MAX,
            ..Host::default()
        });
        let node = controller(host, false);

        let cancelled = tokio::time::timeout(Duration::from_millis(250), node.turn_on()).await;
        assert!(cancelled.is_err());

        let snapshot = node.snapshot();
        assert_eq!(snapshot.state, NodeState::Failed);
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("lifecycle operation cancelled")
        );
        // The in-flight lock was released with the dropped future.
        assert!(node.in_flight.try_lock().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_transitions() {
        let host = Arc::new(Host::default());
        let node = controller(host, false);
        let mut rx = node.subscribe();

        node.turn_on().await.unwrap();

        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.state, NodeState::Up);
        assert_eq!(snapshot.up_generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_keeps_generation_of_up_node() {
        let host = Arc::new(Host::default());
        host.deployed.store(true, Ordering::SeqCst);
        let node = controller(host.clone(), true);

        let report = node.verify().await.unwrap();

        assert_eq!(report.operation, Operation::Verify);
        assert_eq!(node.snapshot().up_generation, 1);
        assert_eq!(host.deploys.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_increments_per_up_period() {
        let host = Arc::new(Host::default());
        let node = controller(host, false);

        node.turn_on().await.unwrap();
        node.turn_off().await.unwrap();
        node.turn_on().await.unwrap();

        assert_eq!(node.snapshot().up_generation, 2);
    }
}
