//! Shepherd Registry - central collector for the agent fleet
//!
//! Ingests periodic heartbeats from nodes, tracks which agents are actually
//! alive on which hosts, answers each heartbeat with the node's desired
//! agents, and evicts hosts that stopped reporting.

mod config;
mod heartbeat;
mod http;
mod models;
mod registry;
mod sweep;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use crate::http::AppState;
use crate::registry::FleetRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shepherd_registry=info".into()),
        )
        .init();

    let cfg_path = match std::env::args().nth(1) {
        Some(arg) if arg == "-v" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(path) => path,
        None => "cfg.json".to_string(),
    };

    let cfg = config::load_config(&cfg_path).await?;
    let addr: SocketAddr = cfg
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", cfg.listen))?;

    let registry = Arc::new(FleetRegistry::new());

    sweep::spawn_sweeper(
        registry.clone(),
        Duration::from_secs(cfg.staleness_secs),
        Duration::from_secs(cfg.sweep_secs),
    );

    let app = http::build_router(AppState {
        registry,
        cfg: Arc::new(cfg),
    });

    info!("listening on http://{addr}");
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await.context("http server")?;
    Ok(())
}
