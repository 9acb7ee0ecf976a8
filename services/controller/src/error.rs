//! Error taxonomy for the controller.

use std::fmt;
use std::time::Duration;

use farm_id::{NodeRole, TemplateId};
use farm_poll::PollOutcome;
use thiserror::Error;

use crate::probe::ProbeObservation;

/// Lifecycle or coordination operation, named in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    TurnOn,
    TurnOff,
    Verify,
    GetClient,
    Synchronize,
    Reset,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::TurnOn => "turn_on",
            Operation::TurnOff => "turn_off",
            Operation::Verify => "verify",
            Operation::GetClient => "get_client",
            Operation::Synchronize => "synchronize",
            Operation::Reset => "reset",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one node reported during a synchronization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncObservation {
    /// Node answered and is ready with this many deployed containers.
    Containers(u32),
    /// Node answered but does not report ready.
    NotReady,
    /// Service facade is not deployed on the node.
    Absent(String),
    /// Probe failed.
    Unreachable(String),
}

impl fmt::Display for SyncObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncObservation::Containers(count) => write!(f, "{count} containers"),
            SyncObservation::NotReady => f.write_str("not ready"),
            SyncObservation::Absent(reason) => write!(f, "absent ({reason})"),
            SyncObservation::Unreachable(reason) => write!(f, "unreachable ({reason})"),
        }
    }
}

/// A node that did not agree on the expected container count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncDisagreement {
    pub role: NodeRole,
    pub observed: SyncObservation,
}

impl fmt::Display for SyncDisagreement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.observed)
    }
}

/// Errors surfaced to callers of the controller.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The deployer refused a deploy or undeploy request.
    #[error("{operation} on node '{node}' rejected after {elapsed:?}: {reason}")]
    DeploymentRejected {
        node: NodeRole,
        operation: Operation,
        reason: String,
        elapsed: Duration,
    },

    /// The node did not reach the awaited state within its budget.
    #[error(
        "{operation} on node '{node}' timed out after {elapsed:?} ({attempts} probes, last outcome: {})",
        describe_outcome(.last_outcome)
    )]
    ReadinessTimeout {
        node: NodeRole,
        operation: Operation,
        elapsed: Duration,
        attempts: u32,
        last_outcome: Option<PollOutcome<ProbeObservation>>,
    },

    /// No usable client could be built for the node within the budget.
    #[error(
        "{} on node '{node}' timed out after {elapsed:?} ({attempts} attempts, last error: {last_error})",
        Operation::GetClient
    )]
    ClientConstructionTimeout {
        node: NodeRole,
        elapsed: Duration,
        attempts: u32,
        last_error: String,
    },

    /// The listed nodes never agreed on the expected container count.
    #[error(
        "{operation} on {expected} containers timed out after {elapsed:?} ({attempts} probes), disagreeing: {}",
        join_disagreements(.disagreeing)
    )]
    SynchronizationTimeout {
        /// `Synchronize`, or `Reset` for the post-reset wait for empty nodes.
        operation: Operation,
        expected: u32,
        elapsed: Duration,
        attempts: u32,
        disagreeing: Vec<SyncDisagreement>,
    },

    /// The role is not part of the cluster view.
    #[error("unknown node role '{role}'")]
    UnknownRole { role: NodeRole },

    /// A client handle outlived the node's Up period.
    #[error("client handle for node '{node}' is stale (generation {generation})")]
    StaleHandle { node: NodeRole, generation: u64 },

    /// Reset could not remove container specs.
    #[error("cleanup of {target} failed: {reason}")]
    Cleanup { target: String, reason: String },

    /// Invalid configuration or arguments.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// HTTP client could not be built.
    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl HarnessError {
    /// Build a cleanup error scoped to one template.
    pub fn cleanup(template: &TemplateId, reason: impl Into<String>) -> Self {
        HarnessError::Cleanup {
            target: format!("server template '{template}'"),
            reason: reason.into(),
        }
    }

    /// Stable snake_case reason code.
    pub fn reason_code(&self) -> &'static str {
        match self {
            HarnessError::DeploymentRejected { .. } => "deployment_rejected",
            HarnessError::ReadinessTimeout { .. } => "readiness_timeout",
            HarnessError::ClientConstructionTimeout { .. } => "client_construction_timeout",
            HarnessError::SynchronizationTimeout { .. } => "synchronization_timeout",
            HarnessError::UnknownRole { .. } => "unknown_role",
            HarnessError::StaleHandle { .. } => "stale_handle",
            HarnessError::Cleanup { .. } => "cleanup_failed",
            HarnessError::Config(_) => "config_invalid",
            HarnessError::HttpClient(_) => "http_client_error",
        }
    }

    /// True for the three budget-exhaustion variants.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            HarnessError::ReadinessTimeout { .. }
                | HarnessError::ClientConstructionTimeout { .. }
                | HarnessError::SynchronizationTimeout { .. }
        )
    }
}

fn describe_outcome(outcome: &Option<PollOutcome<ProbeObservation>>) -> String {
    match outcome {
        Some(PollOutcome::Ready(observation)) => format!("ready, {observation}"),
        Some(PollOutcome::NotReady(Some(observation))) => format!("not ready, {observation}"),
        Some(PollOutcome::NotReady(None)) => "not ready".to_string(),
        Some(PollOutcome::TransientError(reason)) => format!("transient error, {reason}"),
        None => "none".to_string(),
    }
}

fn join_disagreements(disagreeing: &[SyncDisagreement]) -> String {
    disagreeing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
