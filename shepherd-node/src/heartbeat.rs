//! Periodic heartbeat loop: report installed agents, converge on the answer.
//!
//! The first tick is delayed by a random fraction of one interval so a mass
//! restart of the fleet does not hammer the registry in lockstep. A failed
//! send or decode only skips the current cycle; the next tick retries
//! naturally, and nothing in here can take the scheduler down.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::control::AgentControl;
use crate::download::ArtifactFetcher;
use crate::models::{DesiredAgentSpec, HeartbeatRequest, HeartbeatResponse, RealAgentState};
use crate::reconcile::Reconciler;

pub struct Heartbeat<F, C> {
    cfg: NodeConfig,
    hostname: String,
    client: reqwest::Client,
    reconciler: Reconciler<F, C>,
}

impl<F: ArtifactFetcher, C: AgentControl> Heartbeat<F, C> {
    pub fn new(cfg: NodeConfig, reconciler: Reconciler<F, C>) -> Result<Self> {
        let hostname = match cfg.hostname.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => gethostname::gethostname().to_string_lossy().into_owned(),
        };

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60));
        if cfg.insecure_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().context("building heartbeat client")?;

        Ok(Self {
            cfg,
            hostname,
            client,
            reconciler,
        })
    }

    /// Runs forever: jittered first tick, then one cycle per interval.
    pub async fn run(self, mut rng: StdRng) {
        let interval = Duration::from_secs(self.cfg.interval_secs);
        let jitter = startup_jitter(&mut rng, interval);
        info!(
            hostname = %self.hostname,
            interval_secs = interval.as_secs(),
            jitter_ms = jitter.as_millis() as u64,
            "heartbeat loop starting"
        );
        tokio::time::sleep(jitter).await;

        loop {
            if let Err(e) = self.cycle().await {
                warn!("heartbeat cycle skipped: {e:#}");
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn cycle(&self) -> Result<()> {
        let request = self.build_request()?;
        if self.cfg.debug {
            debug!(?request, "heartbeat request");
        }

        let url = format!("https://{}/heartbeat", self.cfg.server);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("posting heartbeat to {url}"))?
            .error_for_status()
            .context("heartbeat rejected")?;
        let response: HeartbeatResponse = response
            .json()
            .await
            .context("decoding heartbeat response")?;
        if self.cfg.debug {
            debug!(?response, "heartbeat response");
        }

        self.dispatch(response).await;
        Ok(())
    }

    /// Converges every desired agent independently; one agent's failure
    /// never blocks the others.
    async fn dispatch(&self, response: HeartbeatResponse) {
        for wire in response.desired_agents {
            let name = wire.name.clone();
            let spec = match DesiredAgentSpec::resolve(wire, Path::new(&self.cfg.workdir)) {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(agent = %name, "skipping unresolvable desired agent: {e}");
                    continue;
                }
            };
            if let Err(e) = self.reconciler.converge(&spec).await {
                warn!(agent = %spec.name, stage = %e.stage, "convergence failed: {e}");
            }
        }
    }

    fn build_request(&self) -> Result<HeartbeatRequest> {
        let real_agents =
            scan_agent_dirs(Path::new(&self.cfg.workdir)).context("scanning agent workdir")?;
        Ok(HeartbeatRequest {
            hostname: self.hostname.clone(),
            real_agents,
        })
    }
}

/// One entry per workdir subdirectory carrying a `.version` marker;
/// directories without a marker never finished an install and are not
/// reported. A workdir that does not exist yet is an empty report.
pub fn scan_agent_dirs(workdir: &Path) -> std::io::Result<Vec<RealAgentState>> {
    let mut agents = Vec::new();
    let entries = match std::fs::read_dir(workdir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(agents),
        Err(e) => return Err(e),
    };

    let now = Utc::now().timestamp();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Ok(version) = std::fs::read_to_string(entry.path().join(".version")) else {
            continue;
        };
        let version = version.trim().to_string();
        if version.is_empty() {
            continue;
        }
        agents.push(RealAgentState {
            name: entry.file_name().to_string_lossy().into_owned(),
            version,
            timestamp: now,
        });
    }
    Ok(agents)
}

/// Uniform delay over one interval, drawn from a caller-owned generator so
/// tests can seed it.
pub fn startup_jitter(rng: &mut impl Rng, interval: Duration) -> Duration {
    let span = interval.as_millis() as u64;
    if span == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rng.gen_range(0..span))
}
