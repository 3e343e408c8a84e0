//! Wire types shared with the nodes (JSON, camelCase).

use serde::{Deserialize, Serialize};

/// Observed state of one agent on one host, as of its last heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealAgentState {
    pub name: String,
    pub version: String,
    /// Unix seconds of the last report.
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub hostname: String,
    #[serde(default)]
    pub real_agents: Vec<RealAgentState>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub desired_agents: Vec<DesiredAgent>,
}

/// Target state for one agent, as served to nodes. The node resolves the
/// local install paths itself; the registry only knows names, versions and
/// artifact URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredAgent {
    pub name: String,
    pub version: String,
    pub tarball_url: String,
    pub md5_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_request_decodes_camel_case() {
        let req: HeartbeatRequest = serde_json::from_str(
            r#"{"hostname":"h1","realAgents":[{"name":"x","version":"1.0","timestamp":1000}]}"#,
        )
        .unwrap();
        assert_eq!(req.hostname, "h1");
        assert_eq!(req.real_agents.len(), 1);
        assert_eq!(req.real_agents[0].version, "1.0");
    }

    #[test]
    fn missing_real_agents_defaults_to_empty() {
        let req: HeartbeatRequest = serde_json::from_str(r#"{"hostname":"h1"}"#).unwrap();
        assert!(req.real_agents.is_empty());
    }

    #[test]
    fn heartbeat_response_encodes_camel_case() {
        let resp = HeartbeatResponse {
            desired_agents: vec![DesiredAgent {
                name: "x".into(),
                version: "1.0".into(),
                tarball_url: "https://dl/x-1.0.tar.gz".into(),
                md5_url: "https://dl/x-1.0.tar.gz.md5".into(),
            }],
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("desiredAgents"));
        assert!(json.contains("tarballUrl"));
    }
}
