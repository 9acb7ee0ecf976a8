//! Status command.

use anyhow::Result;
use clap::Args;
use farm_controller::orchestrator::NodeStatus;
use farm_controller::probe::ProbeObservation;
use farm_poll::PollOutcome;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_output, state_word, OutputFormat};

use super::CommandContext;

/// Show state and liveness of every node.
#[derive(Debug, Args)]
pub struct StatusCommand {}

/// One node as shown by `farmctl status`.
#[derive(Debug, Clone, Serialize, Tabled)]
struct StatusRow {
    #[tabled(rename = "Role")]
    role: String,

    #[tabled(rename = "Host")]
    host: String,

    #[tabled(rename = "State")]
    state: String,

    #[tabled(rename = "Gen")]
    generation: u64,

    #[tabled(rename = "Probe")]
    probe: String,

    #[tabled(rename = "Containers", display = "display_option_u32")]
    containers: Option<u32>,

    #[tabled(rename = "Since")]
    since: String,

    #[tabled(rename = "Last Error", display = "display_option")]
    last_error: Option<String>,
}

fn display_option(opt: &Option<String>) -> String {
    opt.as_deref().unwrap_or("-").to_string()
}

fn display_option_u32(opt: &Option<u32>) -> String {
    opt.map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

impl StatusRow {
    fn from_status(status: &NodeStatus, format: OutputFormat) -> Self {
        let state = match format {
            OutputFormat::Table => state_word(status.snapshot.state).to_string(),
            OutputFormat::Json => status.snapshot.state.as_str().to_string(),
        };
        Self {
            role: status.role.to_string(),
            host: status.host.clone(),
            state,
            generation: status.snapshot.up_generation,
            probe: describe_probe(&status.probe),
            containers: container_count(&status.probe),
            since: status.snapshot.last_transition.to_rfc3339(),
            last_error: status.snapshot.last_error.clone(),
        }
    }
}

fn describe_probe(outcome: &PollOutcome<ProbeObservation>) -> String {
    match outcome {
        PollOutcome::TransientError(reason) => format!("error: {reason}"),
        PollOutcome::Ready(observation) | PollOutcome::NotReady(Some(observation)) => {
            observation.to_string()
        }
        PollOutcome::NotReady(None) => outcome.label().to_string(),
    }
}

fn container_count(outcome: &PollOutcome<ProbeObservation>) -> Option<u32> {
    match outcome.payload() {
        Some(ProbeObservation::Reported(report)) => Some(report.container_count),
        _ => None,
    }
}

impl StatusCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let cluster = ctx.cluster().await?;
        let rows: Vec<StatusRow> = cluster
            .status()
            .await
            .iter()
            .map(|status| StatusRow::from_status(status, ctx.format))
            .collect();

        print_output(&rows, ctx.format);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use farm_controller::probe::NodeStatusReport;
    use farm_controller::{NodeSnapshot, NodeState};
    use farm_id::NodeRole;

    fn status(probe: PollOutcome<ProbeObservation>) -> NodeStatus {
        NodeStatus {
            role: NodeRole::parse("secondary").unwrap(),
            host: "host-b".to_string(),
            snapshot: NodeSnapshot {
                state: NodeState::Up,
                up_generation: 2,
                last_transition: Utc::now(),
                last_error: None,
            },
            probe,
        }
    }

    #[test]
    fn reported_probe_fills_container_column() {
        let report = NodeStatusReport::new(true, 3);
        let row = StatusRow::from_status(
            &status(PollOutcome::Ready(ProbeObservation::Reported(report))),
            OutputFormat::Json,
        );

        assert_eq!(row.role, "secondary");
        assert_eq!(row.state, "up");
        assert_eq!(row.generation, 2);
        assert_eq!(row.containers, Some(3));
        assert_eq!(row.probe, "ready=true containers=3");
    }

    #[test]
    fn absent_node_has_no_container_count() {
        let row = StatusRow::from_status(
            &status(PollOutcome::NotReady(Some(ProbeObservation::Absent(
                "404 Not Found".to_string(),
            )))),
            OutputFormat::Json,
        );

        assert_eq!(row.containers, None);
        assert_eq!(row.probe, "absent (404 Not Found)");
    }

    #[test]
    fn transient_errors_are_shown() {
        let row = StatusRow::from_status(
            &status(PollOutcome::TransientError("connection reset".to_string())),
            OutputFormat::Json,
        );
        assert_eq!(row.probe, "error: connection reset");
    }
}
