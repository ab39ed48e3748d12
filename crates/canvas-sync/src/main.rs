use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use canvas_sync::{AdapterRegistry, BackendConfig, GraphStore, QueryMode};

/// Inspect a graph database the way the canvas sees it.
///
/// The backend is configured from the environment (`CANVAS_BACKEND`,
/// `NEO4J_*` or `STREAMING_*`), optionally through a `.env` file.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a read query and print the projected nodes and edges as JSON
    Query {
        query: String,
    },
    /// Probe the configured backend
    Health,
    /// Manage saved dashboards
    #[command(subcommand)]
    Dashboards(DashboardCommands),
}

#[derive(Subcommand)]
enum DashboardCommands {
    /// List dashboards in display order
    List,
    /// Replay a dashboard and print the restored canvas as JSON
    Open { id: String },
    Rename { id: String, name: String },
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    canvas_sync::init_tracing();
    let cli = Cli::parse();

    let config = BackendConfig::from_env().context("Failed to load backend configuration")?;
    info!("Using {} backend", config.kind());

    let registry = Arc::new(AdapterRegistry::new());
    let store = GraphStore::new(registry.clone());
    store.connect(config).await.context("Failed to connect to the graph database")?;

    let result = run(&store, &registry, cli.command).await;
    store.disconnect().await;
    result
}

async fn run(store: &GraphStore, registry: &AdapterRegistry, command: Commands) -> Result<()> {
    match command {
        Commands::Query { query } => {
            let report = store.run_query(&query, QueryMode::Replace).await.context("Query failed")?;
            info!("{} nodes, {} edges", report.nodes_added, report.edges_added);
            println!("{}", serde_json::to_string_pretty(&store.snapshot())?);
        }
        Commands::Health => match registry.test_connection().await {
            Ok(()) => println!("ok"),
            Err(diagnostic) => anyhow::bail!("Connection test failed: {}", diagnostic),
        },
        Commands::Dashboards(DashboardCommands::List) => {
            for dashboard in store.list_dashboards().await? {
                println!("{}\t{}\t{}", dashboard.position, dashboard.id, dashboard.name);
            }
        }
        Commands::Dashboards(DashboardCommands::Open { id }) => {
            let dashboard = store
                .open_dashboard(&id)
                .await
                .with_context(|| format!("Failed to open dashboard {}", id))?;
            info!("Opened dashboard {}", dashboard.name);
            println!("{}", serde_json::to_string_pretty(&store.snapshot())?);
        }
        Commands::Dashboards(DashboardCommands::Rename { id, name }) => {
            store.rename_dashboard(&id, &name).await?;
        }
        Commands::Dashboards(DashboardCommands::Delete { id }) => {
            store.delete_dashboard(&id).await?;
        }
    }
    Ok(())
}
