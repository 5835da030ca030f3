use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fleet_engine::{Capabilities, EngineConfig, OracleClient, WorkflowEngine, build_catalog};
use fleet_mcp::{ConnectionManager, StdioLauncher, UsageTracker, config};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fleet", version, about = "Route requests to tool provider processes and run the resulting plans")]
struct Cli {
    /// Provider registry file (defaults to `<config_dir>/fleet/mcp.json`).
    #[arg(long, global = true)]
    providers: Option<PathBuf>,

    /// Engine settings file (defaults to `<config_dir>/fleet/engine.json`).
    #[arg(long, global = true)]
    engine: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Plan and execute a natural-language request.
    Run {
        request: String,
        /// Execute steps in bounded-parallel windows.
        #[arg(long)]
        parallel: bool,
        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List the namespaced catalog of every connected provider.
    Tools {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let providers_path = cli.providers.clone().unwrap_or_else(config::default_config_path);
    let registry = config::load_config_from_path(&providers_path)
        .with_context(|| format!("failed to load provider registry {}", providers_path.display()))?;
    let engine_config = match &cli.engine {
        Some(path) => fleet_engine::load_engine_config_from_path(path)?,
        None => fleet_engine::load_engine_config()?,
    };

    let tracker = Arc::new(UsageTracker::new());
    let manager = Arc::new(ConnectionManager::new(registry, tracker.clone(), Arc::new(StdioLauncher)));
    let report = manager.initialize().await;
    for skipped in &report.skipped {
        warn!(provider = %skipped.id, reason = %skipped.reason, "provider unavailable");
    }
    if report.is_empty() {
        manager.disconnect().await;
        bail!("no tool provider connected; check {}", providers_path.display());
    }
    info!(providers = ?report.connected, "providers connected");

    let outcome = match cli.command {
        Command::Run { request, parallel, json } => run_request(&manager, tracker, &engine_config, &request, parallel, json).await,
        Command::Tools { json } => list_tools(&manager, json).await,
    };

    manager.disconnect().await;
    outcome
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn capabilities(engine_config: &EngineConfig) -> Capabilities {
    let Some(settings) = engine_config.oracle.clone() else {
        return Capabilities::deterministic();
    };
    match OracleClient::from_settings(settings) {
        Ok(client) => Capabilities::oracle(Arc::new(client)),
        Err(err) => {
            warn!(error = %err, "oracle unavailable; using deterministic routing");
            Capabilities::deterministic()
        }
    }
}

async fn run_request(
    manager: &Arc<ConnectionManager>,
    tracker: Arc<UsageTracker>,
    engine_config: &EngineConfig,
    request: &str,
    parallel: bool,
    json: bool,
) -> Result<()> {
    let engine = WorkflowEngine::new(manager.clone(), tracker.clone(), capabilities(engine_config), engine_config);
    let result = engine.run(request, parallel.then_some(true)).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.message);
        if !result.tools_used.is_empty() {
            println!("\ntools: {}", result.tools_used.join(", "));
        }
    }

    let stats = tracker.get_stats();
    info!(
        executions = stats.total_executions,
        failed = stats.failed_executions,
        average_ms = stats.average_execution_ms,
        "usage"
    );

    if !result.success {
        bail!("workflow failed after {} recovery attempt(s)", result.metadata.recovery_attempts);
    }
    Ok(())
}

async fn list_tools(manager: &ConnectionManager, json: bool) -> Result<()> {
    let catalog = build_catalog(manager.get_all_tools().await);
    if json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }
    for id in manager.config().mcp_servers.keys() {
        let status = manager.provider_status(id).await;
        println!("{id}: {}", status.display());
    }
    println!();
    for tool in &catalog {
        let tags = if tool.derived_tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", tool.derived_tags.join(", "))
        };
        println!("{}{tags}\n    {}", tool.full_name, tool.description);
    }
    Ok(())
}
