//! Turn nodes on and off.

use anyhow::Result;
use clap::Args;
use farm_controller::node::LifecycleReport;
use farm_id::NodeRole;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_output, print_success, state_word, OutputFormat};

use super::{display_elapsed, CommandContext};

/// Deploy the facade on nodes and wait until they are up.
#[derive(Debug, Args)]
pub struct OnCommand {
    /// Roles to turn on.
    #[arg(required = true)]
    pub(super) roles: Vec<NodeRole>,
}

/// Undeploy the facade from nodes and wait until they are gone.
#[derive(Debug, Args)]
pub struct OffCommand {
    /// Roles to turn off.
    #[arg(required = true)]
    pub(super) roles: Vec<NodeRole>,
}

#[derive(Debug, Clone, Serialize, Tabled)]
struct LifecycleRow {
    #[tabled(rename = "Role")]
    role: String,

    #[tabled(rename = "Operation")]
    operation: String,

    #[tabled(rename = "Changed")]
    changed: bool,

    #[tabled(rename = "State")]
    state: String,

    #[tabled(rename = "Probes")]
    probes: u32,

    #[tabled(rename = "Elapsed")]
    elapsed: String,
}

impl LifecycleRow {
    fn from_report(report: &LifecycleReport, format: OutputFormat) -> Self {
        let state = match format {
            OutputFormat::Table => state_word(report.state).to_string(),
            OutputFormat::Json => report.state.as_str().to_string(),
        };
        Self {
            role: report.role.to_string(),
            operation: report.operation.to_string(),
            changed: report.changed,
            state,
            probes: report.probes,
            elapsed: display_elapsed(report.elapsed),
        }
    }
}

fn print_reports(reports: &[LifecycleReport], verb: &str, format: OutputFormat) {
    let rows: Vec<LifecycleRow> = reports
        .iter()
        .map(|r| LifecycleRow::from_report(r, format))
        .collect();
    print_output(&rows, format);

    if format == OutputFormat::Table {
        let changed = reports.iter().filter(|r| r.changed).count();
        print_success(&format!(
            "{changed} of {} node(s) {verb}",
            reports.len()
        ));
    }
}

impl OnCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let cluster = ctx.cluster().await?;
        let reports = cluster.turn_on_all(&self.roles).await?;
        print_reports(&reports, "turned on", ctx.format);
        Ok(())
    }
}

impl OffCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let cluster = ctx.cluster().await?;
        let reports = cluster.turn_off_all(&self.roles).await?;
        print_reports(&reports, "turned off", ctx.format);
        Ok(())
    }
}
