//! Heartbeat ingestion - merges a decoded heartbeat into the registry.

use tracing::debug;

use crate::models::HeartbeatRequest;
use crate::registry::FleetRegistry;

/// Merges one heartbeat: lazy host bucket creation, per-agent upsert.
/// Agents the host did not mention this round are left untouched and age
/// toward staleness on their own. An empty report is a no-op, so a host
/// never appears in the registry without at least one agent.
pub fn merge_heartbeat(registry: &FleetRegistry, req: HeartbeatRequest) {
    if req.real_agents.is_empty() {
        return;
    }

    debug!(
        hostname = %req.hostname,
        agents = req.real_agents.len(),
        "merging heartbeat"
    );

    let bucket = registry.bucket(&req.hostname);
    for agent in req.real_agents {
        bucket.put(agent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RealAgentState;

    fn agent(name: &str, version: &str, timestamp: i64) -> RealAgentState {
        RealAgentState {
            name: name.to_string(),
            version: version.to_string(),
            timestamp,
        }
    }

    fn request(hostname: &str, agents: Vec<RealAgentState>) -> HeartbeatRequest {
        HeartbeatRequest {
            hostname: hostname.to_string(),
            real_agents: agents,
        }
    }

    #[test]
    fn empty_heartbeat_is_a_no_op() {
        let registry = FleetRegistry::new();
        merge_heartbeat(&registry, request("h1", vec![]));
        assert!(registry.hostnames().is_empty());
    }

    #[test]
    fn first_heartbeat_creates_the_host() {
        let registry = FleetRegistry::new();
        merge_heartbeat(&registry, request("h1", vec![agent("x", "1.0", 1000)]));

        assert_eq!(registry.get("h1", "x").unwrap(), agent("x", "1.0", 1000));
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let registry = FleetRegistry::new();
        let mk = || request("h1", vec![agent("x", "1.0", 1000), agent("y", "2.0", 1000)]);

        merge_heartbeat(&registry, mk());
        merge_heartbeat(&registry, mk());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.bucket("h1").len(), 2);
        assert_eq!(registry.get("h1", "x").unwrap(), agent("x", "1.0", 1000));
    }

    #[test]
    fn unmentioned_agents_survive_a_partial_heartbeat() {
        let registry = FleetRegistry::new();
        merge_heartbeat(&registry, request("h1", vec![agent("x", "1.0", 1000), agent("y", "1.0", 1000)]));
        merge_heartbeat(&registry, request("h1", vec![agent("x", "1.1", 2000)]));

        assert_eq!(registry.get("h1", "x").unwrap().version, "1.1");
        // y keeps aging with its old timestamp
        assert_eq!(registry.get("h1", "y").unwrap().timestamp, 1000);
    }

    #[test]
    fn later_heartbeat_replaces_state_and_refreshes_staleness() {
        let registry = FleetRegistry::new();
        merge_heartbeat(&registry, request("h1", vec![agent("x", "1.0", 1000)]));
        merge_heartbeat(&registry, request("h1", vec![agent("x", "1.0", 2000)]));

        assert_eq!(registry.get("h1", "x").unwrap().timestamp, 2000);
        assert!(!registry.is_stale("h1", 1500));
    }
}
