//! Synchronization, reset and scenario preparation.

use anyhow::Result;
use clap::Args;
use farm_id::NodeRole;
use serde::Serialize;

use crate::output::{print_info, print_single, print_success, OutputFormat};

use super::{display_elapsed, CommandContext};

/// Wait until nodes agree on their container count.
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Number of containers every node must report.
    pub(super) count: u32,

    /// Roles that must agree.
    #[arg(required = true)]
    pub(super) roles: Vec<NodeRole>,
}

/// Delete every container spec from the controller.
#[derive(Debug, Args)]
pub struct ResetCommand {}

/// Bring the farm to a clean starting state.
#[derive(Debug, Args)]
pub struct PrepareCommand {}

#[derive(Debug, Serialize)]
struct SyncOutput {
    expected: u32,
    roles: Vec<String>,
    elapsed_ms: u128,
    attempts: u32,
}

#[derive(Debug, Serialize)]
struct ResetOutput {
    templates: usize,
    deleted: usize,
    already_absent: usize,
}

#[derive(Debug, Serialize)]
struct PrepareOutput {
    scenario_id: String,
}

impl SyncCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let cluster = ctx.cluster().await?;
        let report = cluster
            .wait_for_synchronization(self.count, &self.roles)
            .await?;

        match ctx.format {
            OutputFormat::Json => print_single(&SyncOutput {
                expected: report.expected,
                roles: report.roles.iter().map(ToString::to_string).collect(),
                elapsed_ms: report.elapsed.as_millis(),
                attempts: report.attempts,
            }),
            OutputFormat::Table => print_success(&format!(
                "{} node(s) report {} container(s) after {} ({} probes)",
                report.roles.len(),
                report.expected,
                display_elapsed(report.elapsed),
                report.attempts
            )),
        }
        Ok(())
    }
}

impl ResetCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let cluster = ctx.cluster().await?;
        let report = cluster.reset_cluster().await?;

        match ctx.format {
            OutputFormat::Json => print_single(&ResetOutput {
                templates: report.templates,
                deleted: report.deleted,
                already_absent: report.already_absent,
            }),
            OutputFormat::Table => {
                print_success(&format!(
                    "Deleted {} container spec(s) across {} template(s)",
                    report.deleted, report.templates
                ));
                if report.already_absent > 0 {
                    print_info(&format!(
                        "{} spec(s) were already gone",
                        report.already_absent
                    ));
                }
            }
        }
        Ok(())
    }
}

impl PrepareCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let cluster = ctx.configured_cluster()?;
        let scenario = cluster.prepare_scenario().await?;

        match ctx.format {
            OutputFormat::Json => print_single(&PrepareOutput {
                scenario_id: scenario.to_string(),
            }),
            OutputFormat::Table => {
                print_success(&format!("Cluster ready for scenario {scenario}"))
            }
        }
        Ok(())
    }
}
