//! Shepherd Node - converges this host's agents on their desired versions
//!
//! Periodically reports locally installed agents to the central registry and
//! reconciles whatever the registry wants running here: download, verify,
//! extract, restart, persist. Every reconciliation failure is scoped to one
//! agent and one cycle; only a missing download credential is fatal, since
//! nothing can be installed without it.

mod config;
mod control;
mod download;
mod heartbeat;
mod models;
mod reconcile;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::control::ShellControl;
use crate::download::HttpFetcher;
use crate::heartbeat::Heartbeat;
use crate::reconcile::Reconciler;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shepherd_node=info".into()),
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

    // Fatal by design: no agent can be installed without the credential.
    let password =
        download::read_credential(&cfg.credential_file).context("download credential unavailable")?;

    tokio::fs::create_dir_all(&cfg.workdir)
        .await
        .with_context(|| format!("creating agent workdir {}", cfg.workdir))?;

    let fetcher = HttpFetcher::new(&cfg, password)?;
    let reconciler = Reconciler::new(fetcher, ShellControl);
    let sender = Heartbeat::new(cfg, reconciler)?;

    info!("shepherd-node v{} starting", env!("CARGO_PKG_VERSION"));
    sender.run(StdRng::from_entropy()).await;
    Ok(())
}
