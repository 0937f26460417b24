//! CLI entry point for the topograph probe runtime.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use topograph_graph::Graph;

use topograph_probe::config::{graph_config, load_settings, probe_config};
use topograph_probe::listener::ChangeLogger;
use topograph_probe::scheduler::{jobs_from_config, run_single_sync, SyncScheduler};

#[derive(Parser)]
#[command(name = "topograph-probe")]
#[command(about = "Feed probe snapshots into the topograph graph")]
struct Cli {
    /// Run one sync per probe, print the graph as JSON and exit.
    #[arg(long)]
    once: bool,

    /// Run as daemon with scheduled syncs until Ctrl-C.
    #[arg(long)]
    daemon: bool,

    /// Config file prefix (default: topograph).
    #[arg(short, long, default_value = "topograph")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let settings = load_settings(&cli.config)?;
    let probe_config = probe_config(&settings)?;
    probe_config.validate()?;

    let graph = Arc::new(Graph::new(&graph_config(&settings)?));
    graph.add_listener(Arc::new(ChangeLogger::new()));

    let jobs = jobs_from_config(&graph, &probe_config);
    if jobs.is_empty() {
        tracing::warn!("No enabled sources configured");
    }

    if cli.once {
        for job in &jobs {
            if let Err(e) = run_single_sync(job).await {
                tracing::error!(probe = %job.handler.probe(), error = %e, "Sync failed");
            }
        }
        println!("{}", serde_json::to_string_pretty(&graph.to_json()?)?);
    } else if cli.daemon {
        let (stop, shutdown) = watch::channel(false);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            tracing::info!("Shutdown requested");
            let _ = stop.send(true);
        });

        let sched = SyncScheduler::new(jobs, probe_config.max_concurrent_syncs);
        sched.run(shutdown).await?;
        tracing::info!(nodes = graph.node_count(), edges = graph.edge_count(), "Graph at shutdown");
    } else {
        anyhow::bail!("Specify --once (single sync) or --daemon (scheduled syncs)");
    }

    Ok(())
}
