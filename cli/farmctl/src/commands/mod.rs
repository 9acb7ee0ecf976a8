//! CLI commands.

mod info;
mod lifecycle;
mod status;
mod sync;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use farm_controller::{ClusterOrchestrator, HarnessConfig, HttpClientFactory};
use tracing::debug;

use crate::output::OutputFormat;

/// farmctl - Drive a farm of failover nodes.
#[derive(Debug, Parser)]
#[command(name = "farmctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the cluster config (TOML).
    #[arg(long, global = true, env = "FARM_CONFIG")]
    config: Option<PathBuf>,

    /// Print JSON instead of tables, and log as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show state and liveness of every node.
    Status(status::StatusCommand),

    /// Deploy the facade on nodes and wait until they are up.
    On(lifecycle::OnCommand),

    /// Undeploy the facade from nodes and wait until they are gone.
    Off(lifecycle::OffCommand),

    /// Wait until nodes agree on their container count.
    Sync(sync::SyncCommand),

    /// Delete every container spec from the controller.
    Reset(sync::ResetCommand),

    /// Bring the farm to a clean starting state.
    Prepare(sync::PrepareCommand),

    /// Connect to a node and print its server info.
    Info(info::InfoCommand),
}

impl Cli {
    pub fn json_logs(&self) -> bool {
        self.json
    }

    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let config = crate::config::load(self.config.as_deref())?;
        let ctx = CommandContext {
            config,
            format: OutputFormat::from_flag(self.json),
        };

        match self.command {
            Commands::Status(cmd) => cmd.run(ctx).await,
            Commands::On(cmd) => cmd.run(ctx).await,
            Commands::Off(cmd) => cmd.run(ctx).await,
            Commands::Sync(cmd) => cmd.run(ctx).await,
            Commands::Reset(cmd) => cmd.run(ctx).await,
            Commands::Prepare(cmd) => cmd.run(ctx).await,
            Commands::Info(cmd) => cmd.run(ctx).await,
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: HarnessConfig,
    pub format: OutputFormat,
}

impl CommandContext {
    /// Build an HTTP-backed orchestrator whose node states come from one
    /// probe of each host rather than from the config.
    pub async fn cluster(&self) -> Result<ClusterOrchestrator<HttpClientFactory>> {
        let cluster = self.configured_cluster()?;
        let states = cluster.discover().await;
        debug!(?states, "Discovered cluster");
        Ok(cluster)
    }

    /// Build an HTTP-backed orchestrator trusting the config's deployment
    /// flags, so pre-deployed nodes are verified instead of redeployed.
    pub fn configured_cluster(&self) -> Result<ClusterOrchestrator<HttpClientFactory>> {
        Ok(ClusterOrchestrator::from_config(&self.config)?)
    }
}

/// Seconds with millisecond precision, for tables.
pub(crate) fn display_elapsed(elapsed: std::time::Duration) -> String {
    format!("{:.3}s", elapsed.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_id::NodeRole;

    #[test]
    fn parses_roles_for_on() {
        let cli = Cli::try_parse_from(["farmctl", "on", "primary", "secondary"]).unwrap();
        match cli.command {
            Commands::On(cmd) => assert_eq!(
                cmd.roles,
                vec![
                    NodeRole::parse("primary").unwrap(),
                    NodeRole::parse("secondary").unwrap()
                ]
            ),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["farmctl", "status", "--json", "--config", "farm.toml"])
            .unwrap();
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("farm.toml")));
    }

    #[test]
    fn rejects_invalid_role_names() {
        assert!(Cli::try_parse_from(["farmctl", "off", "Primary!"]).is_err());
    }

    #[test]
    fn sync_needs_a_count_and_roles() {
        assert!(Cli::try_parse_from(["farmctl", "sync", "1"]).is_err());
        let cli = Cli::try_parse_from(["farmctl", "sync", "1", "alpha", "bravo"]).unwrap();
        match cli.command {
            Commands::Sync(cmd) => {
                assert_eq!(cmd.count, 1);
                assert_eq!(cmd.roles.len(), 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn elapsed_is_shown_in_seconds() {
        assert_eq!(
            display_elapsed(std::time::Duration::from_millis(1500)),
            "1.500s"
        );
    }
}
