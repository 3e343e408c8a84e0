//! Registry configuration (JSON file, `cfg.json` by default).

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::models::DesiredAgent;

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Hosts whose agents all reported more than this many seconds ago are
    /// evicted by the sweep.
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
    #[serde(default = "default_sweep_secs")]
    pub sweep_secs: u64,
    /// Fleet-wide desired agents, served to every host without an override.
    #[serde(default)]
    pub desired: Vec<DesiredAgent>,
    /// Per-host overrides; a listed host gets exactly its own list.
    #[serde(default)]
    pub hosts: HashMap<String, Vec<DesiredAgent>>,
}

fn default_listen() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_staleness_secs() -> u64 {
    300
}

fn default_sweep_secs() -> u64 {
    60
}

impl RegistryConfig {
    /// Desired agents for one host: its override if present, else the
    /// fleet-wide list.
    pub fn desired_for(&self, hostname: &str) -> Vec<DesiredAgent> {
        self.hosts
            .get(hostname)
            .cloned()
            .unwrap_or_else(|| self.desired.clone())
    }
}

pub async fn load_config(path: &str) -> Result<RegistryConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config file {path}"))?;
    serde_json::from_str(&content).with_context(|| format!("parsing config file {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg: RegistryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:8090");
        assert_eq!(cfg.staleness_secs, 300);
        assert_eq!(cfg.sweep_secs, 60);
        assert!(cfg.desired.is_empty());
    }

    #[test]
    fn per_host_override_beats_fleet_wide_list() {
        let cfg: RegistryConfig = serde_json::from_str(
            r#"{
                "desired": [{"name":"x","version":"1.0","tarballUrl":"https://dl/x.tar.gz","md5Url":"https://dl/x.tar.gz.md5"}],
                "hosts": {"special": []}
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.desired_for("anyhost").len(), 1);
        assert!(cfg.desired_for("special").is_empty());
    }
}
