//! Info command.

use anyhow::Result;
use clap::Args;
use farm_id::NodeRole;
use serde::Serialize;

use crate::output::{print_single, OutputFormat};

use super::CommandContext;

/// Connect to a node and print its server info.
#[derive(Debug, Args)]
pub struct InfoCommand {
    /// Role of the node.
    role: NodeRole,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    role: String,
    generation: u64,
    server: farm_controller::client::ServerInfo,
    containers: Vec<String>,
}

impl InfoCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let cluster = ctx.cluster().await?;
        let handle = cluster.get_client(&self.role).await?;
        let client = handle.client()?;

        let server = client.server_info().await?;
        let containers = client
            .list_containers()
            .await?
            .into_iter()
            .map(|c| c.container_id.to_string())
            .collect::<Vec<_>>();

        match ctx.format {
            OutputFormat::Json => print_single(&InfoOutput {
                role: self.role.to_string(),
                generation: handle.generation(),
                server,
                containers,
            }),
            OutputFormat::Table => {
                println!("Role:         {}", self.role);
                println!("Generation:   {}", handle.generation());
                println!("Server ID:    {}", server.id);
                println!(
                    "Version:      {}",
                    server.version.as_deref().unwrap_or("-")
                );
                println!("Capabilities: {}", server.capabilities.join(", "));
                if containers.is_empty() {
                    println!("Containers:   -");
                } else {
                    println!("Containers:   {}", containers.join(", "));
                }
            }
        }
        Ok(())
    }
}
