//! Staged reconciler - converges one installed agent on its desired version.
//!
//! Stages run in a fixed order and the first failure aborts the attempt,
//! recording which stage failed:
//!
//!   EnsureDirs -> FetchArtifacts -> Extract -> StopPrevious -> StartNew -> PersistVersion
//!
//! FetchArtifacts and Extract are skipped when the artifacts already exist
//! locally and the tarball verifies, and StartNew never restarts an agent
//! whose status already confirms it running. Together that makes a converge
//! call safe on every heartbeat response: a healthy install costs a couple
//! of status checks and nothing else. The next response naturally retries a
//! failed attempt from the first stage.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::control::{confirms_started, AgentControl, ControlError};
use crate::download::{checksum_ok, ArtifactFetcher, DownloadError};
use crate::models::DesiredAgentSpec;

/// Grace period before the single post-start status re-check.
pub const START_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    EnsureDirs,
    FetchArtifacts,
    Extract,
    StopPrevious,
    StartNew,
    PersistVersion,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::EnsureDirs => "ensure-dirs",
            Stage::FetchArtifacts => "fetch-artifacts",
            Stage::Extract => "extract",
            Stage::StopPrevious => "stop-previous",
            Stage::StartNew => "start-new",
            Stage::PersistVersion => "persist-version",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error("checksum mismatch for {0}")]
    ChecksumMismatch(String),
    #[error("tar zxf {tarball} exited with code {code:?}")]
    Extraction {
        tarball: String,
        code: Option<i32>,
    },
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("status did not confirm a running agent after start")]
    StartUnconfirmed,
}

/// A convergence attempt that stopped, and where.
#[derive(Debug, Error)]
#[error("{stage} failed for agent {agent}: {source}")]
pub struct StageError {
    pub stage: Stage,
    pub agent: String,
    #[source]
    pub source: ReconcileError,
}

pub struct Reconciler<F, C> {
    fetcher: F,
    control: C,
}

impl<F: ArtifactFetcher, C: AgentControl> Reconciler<F, C> {
    pub fn new(fetcher: F, control: C) -> Self {
        Self { fetcher, control }
    }

    /// Drives one desired agent through the stages, stopping at the first
    /// failure. Errors are scoped to this agent and this attempt.
    pub async fn converge(&self, spec: &DesiredAgentSpec) -> Result<(), StageError> {
        let at = |stage: Stage| {
            let agent = spec.name.clone();
            move |source: ReconcileError| StageError {
                stage,
                agent,
                source,
            }
        };

        self.ensure_dirs(spec).map_err(at(Stage::EnsureDirs))?;

        if self.artifacts_ready(spec) {
            debug!(agent = %spec.name, version = %spec.version, "artifacts already verified, skipping download");
        } else {
            self.fetch_artifacts(spec)
                .await
                .map_err(at(Stage::FetchArtifacts))?;
            self.extract(spec).await.map_err(at(Stage::Extract))?;
        }

        self.stop_previous(spec)
            .await
            .map_err(at(Stage::StopPrevious))?;
        self.start_new(spec).await.map_err(at(Stage::StartNew))?;
        self.persist_version(spec)
            .map_err(at(Stage::PersistVersion))?;

        info!(agent = %spec.name, version = %spec.version, "agent converged");
        Ok(())
    }

    fn ensure_dirs(&self, spec: &DesiredAgentSpec) -> Result<(), ReconcileError> {
        std::fs::create_dir_all(&spec.agent_dir)?;
        std::fs::create_dir_all(&spec.agent_version_dir)?;
        Ok(())
    }

    /// True when tarball, checksum file and control file all exist and the
    /// tarball verifies. A verification read error counts as not ready.
    fn artifacts_ready(&self, spec: &DesiredAgentSpec) -> bool {
        if !spec.tarball_filepath().exists()
            || !spec.md5_filepath().exists()
            || !spec.control_filepath.exists()
        {
            return false;
        }
        checksum_ok(
            &spec.agent_version_dir,
            &spec.md5_filename,
            &spec.tarball_filename,
        )
        .unwrap_or(false)
    }

    async fn fetch_artifacts(&self, spec: &DesiredAgentSpec) -> Result<(), ReconcileError> {
        self.fetcher
            .fetch(&spec.tarball_url, &spec.tarball_filepath())
            .await?;
        self.fetcher.fetch(&spec.md5_url, &spec.md5_filepath()).await?;

        // Mismatching artifacts stay on disk for inspection; the next cycle
        // re-downloads over them.
        if !checksum_ok(
            &spec.agent_version_dir,
            &spec.md5_filename,
            &spec.tarball_filename,
        )? {
            return Err(ReconcileError::ChecksumMismatch(
                spec.tarball_filename.clone(),
            ));
        }
        Ok(())
    }

    async fn extract(&self, spec: &DesiredAgentSpec) -> Result<(), ReconcileError> {
        let status = Command::new("tar")
            .arg("zxf")
            .arg(&spec.tarball_filename)
            .current_dir(&spec.agent_version_dir)
            .status()
            .await?;
        if !status.success() {
            return Err(ReconcileError::Extraction {
                tarball: spec.tarball_filename.clone(),
                code: status.code(),
            });
        }
        Ok(())
    }

    /// Stops the previously installed version, if the marker names one that
    /// differs from the desired version and its directory still exists.
    async fn stop_previous(&self, spec: &DesiredAgentSpec) -> Result<(), ReconcileError> {
        let installed = match std::fs::read_to_string(spec.version_marker()) {
            Ok(version) => version.trim().to_string(),
            Err(_) => return Ok(()),
        };
        if installed.is_empty() || installed == spec.version {
            return Ok(());
        }

        let old_dir = spec.agent_dir.join(&installed);
        if !old_dir.exists() {
            return Ok(());
        }
        info!(agent = %spec.name, old_version = %installed, "stopping previous version");
        self.control.stop(&old_dir).await?;
        Ok(())
    }

    /// Ensures the desired version is running: status pre-check, then start,
    /// then an immediate status check with exactly one re-check after the
    /// grace period.
    async fn start_new(&self, spec: &DesiredAgentSpec) -> Result<(), ReconcileError> {
        if self.confirmed_running(spec).await {
            return Ok(());
        }

        self.control.start(&spec.agent_version_dir).await?;

        if self.confirmed_running(spec).await {
            return Ok(());
        }
        tokio::time::sleep(START_GRACE).await;
        if self.confirmed_running(spec).await {
            return Ok(());
        }
        Err(ReconcileError::StartUnconfirmed)
    }

    async fn confirmed_running(&self, spec: &DesiredAgentSpec) -> bool {
        match self.control.status(&spec.agent_version_dir).await {
            Ok(output) => confirms_started(&output),
            // A status failure just means "not confirmed running"
            Err(_) => false,
        }
    }

    /// Written only after a verified, running install, so a restarted node
    /// can recover the last-known-installed version.
    fn persist_version(&self, spec: &DesiredAgentSpec) -> Result<(), ReconcileError> {
        std::fs::write(spec.version_marker(), &spec.version)?;
        Ok(())
    }
}
