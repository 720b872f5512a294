//! `toolmesh`: connect the servers listed in a config file, then report
//! status, call a tool, run a tool chain, or watch the connections.

mod config;

use clap::{Parser, Subcommand};
use config::{load_calls, ServersFile};
use std::path::PathBuf;
use tokio::sync::mpsc;
use toolmesh_core::{ChainMode, ConnectionEvent, ToolChain, TransportEvent};
use toolmesh_router::ToolRouter;
use toolmesh_supervisor::ConnectionSupervisor;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "toolmesh", about = "Multi-transport tool server connection manager")]
struct Cli {
    /// Path to the servers file (TOML, or JSON by extension)
    #[arg(short, long, default_value = "toolmesh.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect every server and print the status table
    Status,
    /// Call one tool, failing over to another server on error
    Call {
        /// Tool name
        tool: String,
        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Run a JSON list of tool calls
    Chain {
        /// File holding the calls
        file: PathBuf,
        /// Run all calls at once instead of in order
        #[arg(long)]
        parallel: bool,
    },
    /// Keep the servers connected and log status events until Ctrl-C
    Watch,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Log every status event until the supervisor is dropped.
fn spawn_event_logger(mut rx: mpsc::Receiver<ConnectionEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match &event {
                ConnectionEvent::Transport {
                    event: TransportEvent::Message(_),
                    ..
                } => debug!(server = %event.server(), "{event}"),
                ConnectionEvent::ConnectFailed { .. }
                | ConnectionEvent::HealthCheckFailed { .. }
                | ConnectionEvent::Failover { .. } => warn!(server = %event.server(), "{event}"),
                _ => info!(server = %event.server(), "{event}"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let file = ServersFile::load(&cli.config).await?;
    info!(
        config = %cli.config.display(),
        servers = file.servers.len(),
        "Loaded server configuration"
    );

    let (supervisor, events) = ConnectionSupervisor::new(file.supervisor.clone());
    spawn_event_logger(events);
    let router = ToolRouter::new(supervisor.clone(), file.chain.clone());

    let results = supervisor.connect_multiple(file.servers).await;
    let failed: Vec<&String> = results
        .iter()
        .filter(|(_, ok)| !**ok)
        .map(|(name, _)| name)
        .collect();
    if !failed.is_empty() {
        warn!(servers = ?failed, "Some servers failed to connect");
    }

    let outcome = run(&cli.command, &supervisor, &router).await;
    supervisor.disconnect_all().await;
    outcome
}

async fn run(
    command: &Commands,
    supervisor: &ConnectionSupervisor,
    router: &ToolRouter,
) -> anyhow::Result<()> {
    match command {
        Commands::Status => {
            let statuses = supervisor.get_connection_statuses();
            println!("{}", serde_json::to_string_pretty(&statuses)?);
        }
        Commands::Call { tool, args } => {
            let arguments: serde_json::Value = serde_json::from_str(args)
                .map_err(|e| anyhow::anyhow!("--args is not valid JSON: {e}"))?;
            let result = router.execute_tool(tool, arguments).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Chain { file, parallel } => {
            let chain = ToolChain {
                calls: load_calls(file).await?,
                mode: if *parallel {
                    ChainMode::Parallel
                } else {
                    ChainMode::Sequential
                },
            };
            let results = router.execute_tool_chain(&chain).await;
            println!("{}", serde_json::to_string_pretty(&results)?);
            let failures = results.iter().filter(|r| r.is_error()).count();
            if failures > 0 {
                anyhow::bail!("{failures} of {} chain steps failed", results.len());
            }
        }
        Commands::Watch => {
            info!("Watching servers, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
        }
    }
    Ok(())
}
