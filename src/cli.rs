//! Command-line interface
//!
//! Thin subcommand layer over the coordinator: `serve` runs the API server
//! with background sweeps, `hunt` runs a single hunt and prints the
//! synthesis, `agents` and `status` are read-only inspections.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

use crate::api::{create_router, AppState};
use crate::config::AppConfig;
use crate::coordinator::HuntCoordinator;
use crate::error::{QuarryError, Result};

#[derive(Parser)]
#[command(name = "quarry", version, about = "Reputation-weighted coordinator for paid data-agent fleets")]
pub struct Cli {
    /// Explicit config file (layered over config/default and config/local)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the API server, settlement sweep and (if enabled) the autopilot
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one hunt and print the synthesis as JSON
    Hunt { topic: String },
    /// Print the configured agent fleet
    Agents,
    /// Print persisted reputation and settlement state
    Status,
}

pub async fn run_serve(cfg: AppConfig, port_override: Option<u16>) -> Result<()> {
    let host = cfg.server.host.clone();
    let port = port_override.unwrap_or(cfg.server.port);

    let coordinator = HuntCoordinator::bootstrap(cfg).await?;
    coordinator.start_background().await;

    let shutdown = coordinator.shutdown_handle();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.listen_for_signals().await });
    }

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| QuarryError::Validation(format!("invalid server address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    let state = AppState::new(coordinator.clone());
    let mut shutdown_rx = shutdown.subscribe();
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    coordinator.teardown().await;
    Ok(())
}

pub async fn run_hunt_once(cfg: AppConfig, topic: &str) -> Result<()> {
    let coordinator = HuntCoordinator::bootstrap(cfg).await?;
    let synthesis = coordinator.run_hunt(topic).await?;
    println!("{}", serde_json::to_string_pretty(&synthesis)?);
    coordinator.teardown().await;
    Ok(())
}

pub async fn print_agents(cfg: AppConfig) -> Result<()> {
    if cfg.agents.registry.is_empty() {
        println!("no agents configured");
        return Ok(());
    }
    for agent in &cfg.agents.registry {
        let rival = agent
            .competes_with
            .as_deref()
            .map(|r| format!("  competes with {r}"))
            .unwrap_or_default();
        println!(
            "{:<20} {:<10} base ${:<8} {}{rival}",
            agent.key, agent.category, agent.base_price, agent.endpoint
        );
    }
    Ok(())
}

pub async fn print_status(cfg: AppConfig) -> Result<()> {
    let coordinator = HuntCoordinator::bootstrap(cfg).await?;

    let reputation = coordinator.reputation().await;
    if reputation.is_empty() {
        println!("no reputation history yet");
    } else {
        println!("{:<20} {:>6} {:>7} {:>9} {:>12}", "agent", "score", "hunts", "accuracy", "pnl");
        for (key, snap) in &reputation {
            println!(
                "{:<20} {:>6.3} {:>7} {:>8.1}% {:>12}",
                key,
                snap.score,
                snap.hunts,
                snap.accuracy * 100.0,
                snap.cumulative_pnl
            );
        }
    }

    let pending = coordinator.pending_settlements().await;
    let history = coordinator.settlement_history().await;
    println!(
        "\nsettlements: {} pending, {} settled",
        pending.len(),
        history.len()
    );

    let autopilot = coordinator.autopilot_status().await;
    println!(
        "autopilot: {} (interval {}ms, {} hunts)",
        autopilot.phase, autopilot.interval_ms, autopilot.hunts_run
    );
    Ok(())
}
