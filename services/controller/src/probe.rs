//! Node status probing.
//!
//! A probe asks the service facade for its state. The answer is then read
//! one of two ways:
//! - [`liveness`]: ready means the facade is up and reports ready
//! - [`absence`]: ready means the facade is gone or reports not ready
//!
//! 404 and refused connections mean "not deployed". Everything else,
//! including DNS failures, unreachable hosts, timeouts, 5xx and undecodable
//! bodies, is transient and gets retried by the poller.

use std::error::Error as _;
use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use farm_poll::PollOutcome;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::error::HarnessError;
use crate::topology::NodeSpec;

/// State reported by a node's status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatusReport {
    pub ready: bool,
    pub container_count: u32,
    /// Full response body.
    pub raw: serde_json::Value,
}

impl NodeStatusReport {
    pub fn new(ready: bool, container_count: u32) -> Self {
        Self {
            ready,
            container_count,
            raw: serde_json::json!({ "ready": ready, "container_count": container_count }),
        }
    }
}

/// Probe failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// Service facade is not deployed.
    #[error("service absent: {0}")]
    Absent(String),

    /// Probe failed in a way worth retrying.
    #[error("probe failed: {0}")]
    Transient(String),
}

/// Payload carried by probe outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeObservation {
    Reported(NodeStatusReport),
    Absent(String),
}

impl fmt::Display for ProbeObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeObservation::Reported(report) => write!(
                f,
                "ready={} containers={}",
                report.ready, report.container_count
            ),
            ProbeObservation::Absent(reason) => write!(f, "absent ({reason})"),
        }
    }
}

/// Reads the status endpoint of a node.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn probe(&self, node: &NodeSpec) -> Result<NodeStatusReport, ProbeError>;
}

/// Read a probe as "is the node up".
pub fn liveness(result: Result<NodeStatusReport, ProbeError>) -> PollOutcome<ProbeObservation> {
    match result {
        Ok(report) if report.ready => PollOutcome::Ready(ProbeObservation::Reported(report)),
        Ok(report) => PollOutcome::NotReady(Some(ProbeObservation::Reported(report))),
        Err(ProbeError::Absent(reason)) => {
            PollOutcome::NotReady(Some(ProbeObservation::Absent(reason)))
        }
        Err(ProbeError::Transient(reason)) => PollOutcome::TransientError(reason),
    }
}

/// Read a probe as "is the node gone".
pub fn absence(result: Result<NodeStatusReport, ProbeError>) -> PollOutcome<ProbeObservation> {
    match result {
        Ok(report) if report.ready => {
            PollOutcome::NotReady(Some(ProbeObservation::Reported(report)))
        }
        Ok(report) => PollOutcome::Ready(ProbeObservation::Reported(report)),
        Err(ProbeError::Absent(reason)) => PollOutcome::Ready(ProbeObservation::Absent(reason)),
        Err(ProbeError::Transient(reason)) => PollOutcome::TransientError(reason),
    }
}

#[derive(Debug, Deserialize)]
struct StateBody {
    ready: bool,
    #[serde(default)]
    container_count: u32,
}

/// Probe issuing `GET {url}/state`.
pub struct HttpStatusProbe {
    client: reqwest::Client,
}

impl HttpStatusProbe {
    /// Create a probe whose requests are bounded by `probe_timeout`.
    pub fn new(probe_timeout: Duration) -> Result<Self, HarnessError> {
        let client = reqwest::Client::builder().timeout(probe_timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StatusProbe for HttpStatusProbe {
    async fn probe(&self, node: &NodeSpec) -> Result<NodeStatusReport, ProbeError> {
        let url = node.state_url();

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) if is_connection_refused(&e) => return Err(ProbeError::Absent(e.to_string())),
            Err(e) => return Err(ProbeError::Transient(e.to_string())),
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProbeError::Absent(status.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(role = %node.role, status = %status, body = %body, "Status probe failed");
            return Err(ProbeError::Transient(format!("{status} - {body}")));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProbeError::Transient(format!("invalid state body: {e}")))?;
        let body: StateBody = serde_json::from_value(raw.clone())
            .map_err(|e| ProbeError::Transient(format!("invalid state body: {e}")))?;

        Ok(NodeStatusReport {
            ready: body.ready,
            container_count: body.container_count,
            raw,
        })
    }
}

/// True only when the host actively refused the connection.
fn is_connection_refused(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = cause.source();
    }
    false
}
