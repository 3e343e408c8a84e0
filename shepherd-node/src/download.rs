//! Artifact download and checksum verification.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use md5::{Digest, Md5};
use thiserror::Error;
use tracing::debug;

use crate::config::NodeConfig;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("transfer from {url} failed: {source}")]
    Transfer {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("writing {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fetches one artifact to a local path. The reconciler only depends on this
/// trait, so tests can serve artifacts without a network.
pub trait ArtifactFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), DownloadError>;
}

/// Production fetcher: authenticated HTTP GET with a short connect timeout
/// and a long total-transfer timeout, tolerating slow links without hanging.
pub struct HttpFetcher {
    client: reqwest::Client,
    user: String,
    password: String,
}

impl HttpFetcher {
    pub fn new(cfg: &NodeConfig, password: String) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60));
        if cfg.insecure_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(Self {
            client: builder.build().context("building download client")?,
            user: cfg.download_user.clone(),
            password,
        })
    }
}

impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        debug!(url, dest = %dest.display(), "downloading artifact");
        let response = self
            .client
            .get(url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|source| DownloadError::Transfer {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| DownloadError::Transfer {
                url: url.to_string(),
                source,
            })?;
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|source| DownloadError::Write {
                path: dest.display().to_string(),
                source,
            })?;
        Ok(())
    }
}

/// Reads the download credential, trimming the trailing newline. A missing
/// file is a fatal local configuration error surfaced by the caller.
pub fn read_credential(path: &str) -> Result<String> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading credential file {path}"))?;
    Ok(content.trim_end_matches('\n').to_string())
}

/// Checks the tarball against its checksum file (`md5sum` format: one
/// `<hex digest>  <filename>` per line). Returns false when the tarball's
/// line is absent, its file is missing, or the digest differs.
pub fn checksum_ok(
    version_dir: &Path,
    md5_filename: &str,
    tarball_filename: &str,
) -> std::io::Result<bool> {
    let content = std::fs::read_to_string(version_dir.join(md5_filename))?;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(expected), Some(filename)) = (parts.next(), parts.next()) else {
            continue;
        };
        // md5sum prefixes binary-mode entries with '*'
        if filename.trim_start_matches('*') != tarball_filename {
            continue;
        }
        let tarball_path = version_dir.join(tarball_filename);
        if !tarball_path.exists() {
            return Ok(false);
        }
        let actual = md5_file(&tarball_path)?;
        return Ok(actual == expected.to_ascii_lowercase());
    }

    Ok(false)
}

fn md5_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(hasher.finalize().as_slice()))
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(char::from(HEX[(b >> 4) as usize]));
        out.push(char::from(HEX[(b & 0xf) as usize]));
    }
    out
}
