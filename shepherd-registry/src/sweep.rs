//! Background eviction of hosts that stopped heartbeating.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::registry::FleetRegistry;

/// Spawns the periodic sweep: every `every`, evict hosts whose agents all
/// last reported more than `window` ago.
pub fn spawn_sweeper(
    registry: Arc<FleetRegistry>,
    window: Duration,
    every: Duration,
) -> JoinHandle<()> {
    info!(
        window_secs = window.as_secs(),
        sweep_secs = every.as_secs(),
        "starting stale-host sweep"
    );

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let before = chrono::Utc::now().timestamp() - window.as_secs() as i64;
            let evicted = sweep_once(&registry, before);
            if evicted > 0 {
                info!(evicted, "stale-host sweep done");
            } else {
                debug!("stale-host sweep found nothing");
            }
        }
    })
}

/// One sweep pass. Works off a hostnames snapshot so the host-set lock is
/// never held while a host's agent map is examined; a heartbeat landing
/// between the check and the evict just re-creates the host on its next
/// report.
pub fn sweep_once(registry: &FleetRegistry, before: i64) -> usize {
    let mut evicted = 0;
    for hostname in registry.hostnames() {
        if registry.is_stale(&hostname, before) {
            info!(hostname = %hostname, "evicting stale host");
            registry.evict(&hostname);
            evicted += 1;
        }
    }
    evicted
}
