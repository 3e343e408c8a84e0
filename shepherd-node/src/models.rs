//! Wire types shared with the registry, plus the resolved per-node
//! desired-agent spec the reconciler works on.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Observed state of one locally installed agent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealAgentState {
    pub name: String,
    pub version: String,
    /// Unix seconds of this report.
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub hostname: String,
    pub real_agents: Vec<RealAgentState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    #[serde(default)]
    pub desired_agents: Vec<DesiredAgent>,
}

/// Desired agent as served by the registry: names, versions and artifact
/// URLs only. Local paths are resolved on this side.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredAgent {
    pub name: String,
    pub version: String,
    pub tarball_url: String,
    pub md5_url: String,
}

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("desired agent has an empty {0}")]
    EmptyField(&'static str),
    #[error("no filename in url {0}")]
    BadUrl(String),
}

/// Fully resolved target state for one agent on this node.
#[derive(Debug, Clone)]
pub struct DesiredAgentSpec {
    pub name: String,
    pub version: String,
    pub tarball_url: String,
    pub md5_url: String,
    pub agent_dir: PathBuf,
    pub agent_version_dir: PathBuf,
    pub tarball_filename: String,
    pub md5_filename: String,
    pub control_filepath: PathBuf,
}

impl DesiredAgentSpec {
    /// Resolves a wire entry against the local agents workdir:
    /// `workdir/<name>/` holds the `.version` marker, `workdir/<name>/<version>/`
    /// holds the artifacts and the `control` script.
    pub fn resolve(wire: DesiredAgent, workdir: &Path) -> Result<Self, SpecError> {
        if wire.name.is_empty() {
            return Err(SpecError::EmptyField("name"));
        }
        if wire.version.is_empty() {
            return Err(SpecError::EmptyField("version"));
        }

        let tarball_filename = url_filename(&wire.tarball_url)?;
        let md5_filename = url_filename(&wire.md5_url)?;
        let agent_dir = workdir.join(&wire.name);
        let agent_version_dir = agent_dir.join(&wire.version);
        let control_filepath = agent_version_dir.join("control");

        Ok(Self {
            name: wire.name,
            version: wire.version,
            tarball_url: wire.tarball_url,
            md5_url: wire.md5_url,
            agent_dir,
            agent_version_dir,
            tarball_filename,
            md5_filename,
            control_filepath,
        })
    }

    pub fn tarball_filepath(&self) -> PathBuf {
        self.agent_version_dir.join(&self.tarball_filename)
    }

    pub fn md5_filepath(&self) -> PathBuf {
        self.agent_version_dir.join(&self.md5_filename)
    }

    /// Marker recording the last verified, running install.
    pub fn version_marker(&self) -> PathBuf {
        self.agent_dir.join(".version")
    }
}

fn url_filename(url: &str) -> Result<String, SpecError> {
    match url.rsplit('/').next() {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(SpecError::BadUrl(url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire() -> DesiredAgent {
        DesiredAgent {
            name: "falcon".into(),
            version: "1.2.0".into(),
            tarball_url: "https://dl.example.com/falcon-1.2.0.tar.gz".into(),
            md5_url: "https://dl.example.com/falcon-1.2.0.tar.gz.md5".into(),
        }
    }

    #[test]
    fn resolve_builds_the_local_layout() {
        let spec = DesiredAgentSpec::resolve(wire(), Path::new("/srv/agents")).unwrap();

        assert_eq!(spec.agent_dir, PathBuf::from("/srv/agents/falcon"));
        assert_eq!(spec.agent_version_dir, PathBuf::from("/srv/agents/falcon/1.2.0"));
        assert_eq!(spec.tarball_filename, "falcon-1.2.0.tar.gz");
        assert_eq!(spec.md5_filename, "falcon-1.2.0.tar.gz.md5");
        assert_eq!(
            spec.control_filepath,
            PathBuf::from("/srv/agents/falcon/1.2.0/control")
        );
        assert_eq!(
            spec.version_marker(),
            PathBuf::from("/srv/agents/falcon/.version")
        );
    }

    #[test]
    fn resolve_rejects_url_without_filename() {
        let mut bad = wire();
        bad.tarball_url = "https://dl.example.com/".into();
        assert!(matches!(
            DesiredAgentSpec::resolve(bad, Path::new("/srv/agents")),
            Err(SpecError::BadUrl(_))
        ));
    }

    #[test]
    fn resolve_rejects_empty_name() {
        let mut bad = wire();
        bad.name = String::new();
        assert!(matches!(
            DesiredAgentSpec::resolve(bad, Path::new("/srv/agents")),
            Err(SpecError::EmptyField("name"))
        ));
    }

    #[test]
    fn response_decodes_camel_case_and_tolerates_empty_body() {
        let resp: HeartbeatResponse = serde_json::from_str(
            r#"{"desiredAgents":[{"name":"x","version":"1.0","tarballUrl":"https://d/x.tar.gz","md5Url":"https://d/x.tar.gz.md5"}]}"#,
        )
        .unwrap();
        assert_eq!(resp.desired_agents.len(), 1);

        let empty: HeartbeatResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.desired_agents.is_empty());
    }
}
