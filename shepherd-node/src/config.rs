//! Node configuration (JSON file, `cfg.json` by default).

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Registry endpoint, host:port. Heartbeats go to `https://{server}/heartbeat`.
    pub server: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Hostname override; detected from the OS when unset.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Root directory holding one subdirectory per installed agent.
    #[serde(default = "default_workdir")]
    pub workdir: String,
    /// File holding the artifact download credential.
    #[serde(default = "default_credential_file")]
    pub credential_file: String,
    #[serde(default = "default_download_user")]
    pub download_user: String,
    /// Skip TLS certificate validation on heartbeats and downloads. External
    /// policy choice for fleets running on self-signed certificates.
    #[serde(default)]
    pub insecure_tls: bool,
    /// Dump outbound requests and inbound responses at debug level.
    #[serde(default)]
    pub debug: bool,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_workdir() -> String {
    "./agents".to_string()
}

fn default_credential_file() -> String {
    "./credential".to_string()
}

fn default_download_user() -> String {
    "shepherd".to_string()
}

pub async fn load_config(path: &str) -> Result<NodeConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config file {path}"))?;
    serde_json::from_str(&content).with_context(|| format!("parsing config file {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_is_required_everything_else_defaults() {
        let cfg: NodeConfig = serde_json::from_str(r#"{"server":"meta.example.com:8090"}"#).unwrap();
        assert_eq!(cfg.server, "meta.example.com:8090");
        assert_eq!(cfg.interval_secs, 60);
        assert_eq!(cfg.workdir, "./agents");
        assert!(!cfg.insecure_tls);
        assert!(cfg.hostname.is_none());

        assert!(serde_json::from_str::<NodeConfig>("{}").is_err());
    }
}
