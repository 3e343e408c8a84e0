//! Fleet registry - concurrent `hostname -> (agent -> RealAgentState)` map.
//!
//! Two-level locking: one lock guards the host set, one lock per host guards
//! that host's agent map. Reads never block reads, and a write to one host's
//! bucket never blocks traffic to a different host.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::models::RealAgentState;

/// Per-host agent map. Created lazily on the first heartbeat from a host,
/// removed only as a whole via [`FleetRegistry::evict`].
pub struct HostAgents {
    agents: RwLock<HashMap<String, RealAgentState>>,
}

impl HostAgents {
    fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, agent_name: &str) -> Option<RealAgentState> {
        self.agents.read().get(agent_name).cloned()
    }

    /// Upsert: the latest report for an agent name fully replaces the
    /// previous state.
    pub fn put(&self, state: RealAgentState) {
        self.agents.write().insert(state.name.clone(), state);
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    /// True iff every tracked agent last reported at or before `before`.
    /// An empty bucket is unreachable through the merge path; if one ever
    /// exists it counts as stale and gets swept away.
    pub fn is_stale(&self, before: i64) -> bool {
        self.agents.read().values().all(|ra| ra.timestamp <= before)
    }
}

/// Top-level host map. One instance per registry process, injected into the
/// HTTP handlers and the eviction sweep.
pub struct FleetRegistry {
    hosts: RwLock<HashMap<String, Arc<HostAgents>>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self {
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the host's bucket, creating it if this is the first report.
    pub fn bucket(&self, hostname: &str) -> Arc<HostAgents> {
        if let Some(bucket) = self.hosts.read().get(hostname) {
            return bucket.clone();
        }
        self.hosts
            .write()
            .entry(hostname.to_string())
            .or_insert_with(|| Arc::new(HostAgents::new()))
            .clone()
    }

    fn host(&self, hostname: &str) -> Option<Arc<HostAgents>> {
        self.hosts.read().get(hostname).cloned()
    }

    pub fn get(&self, hostname: &str, agent_name: &str) -> Option<RealAgentState> {
        self.host(hostname)?.get(agent_name)
    }

    pub fn put(&self, hostname: &str, state: RealAgentState) {
        self.bucket(hostname).put(state);
    }

    /// Snapshot of currently tracked hosts.
    pub fn hostnames(&self) -> Vec<String> {
        self.hosts.read().keys().cloned().collect()
    }

    /// True iff the host exists and all of its agents last reported at or
    /// before `before`. Unknown hosts are never stale.
    pub fn is_stale(&self, hostname: &str, before: i64) -> bool {
        match self.host(hostname) {
            Some(bucket) => bucket.is_stale(before),
            None => false,
        }
    }

    /// Removes the host and all its agent state in one step.
    pub fn evict(&self, hostname: &str) {
        self.hosts.write().remove(hostname);
    }

    /// Fan-out snapshot of one agent across all hosts. Hosts that never
    /// reported the agent map to `None`.
    pub fn status_of(&self, agent_name: &str) -> HashMap<String, Option<RealAgentState>> {
        // Snapshot the buckets first so per-host lookups run without the
        // host-set lock held.
        let snapshot: Vec<(String, Arc<HostAgents>)> = self
            .hosts
            .read()
            .iter()
            .map(|(hostname, bucket)| (hostname.clone(), bucket.clone()))
            .collect();

        snapshot
            .into_iter()
            .map(|(hostname, bucket)| {
                let state = bucket.get(agent_name);
                (hostname, state)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }
}

impl Default for FleetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str, version: &str, timestamp: i64) -> RealAgentState {
        RealAgentState {
            name: name.to_string(),
            version: version.to_string(),
            timestamp,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let registry = FleetRegistry::new();
        registry.put("h1", agent("x", "1.0", 1000));

        let got = registry.get("h1", "x").unwrap();
        assert_eq!(got, agent("x", "1.0", 1000));
        assert!(registry.get("h1", "y").is_none());
        assert!(registry.get("h2", "x").is_none());
    }

    #[test]
    fn put_replaces_previous_state_entirely() {
        let registry = FleetRegistry::new();
        registry.put("h1", agent("x", "1.0", 1000));
        registry.put("h1", agent("x", "2.0", 2000));

        let got = registry.get("h1", "x").unwrap();
        assert_eq!(got.version, "2.0");
        assert_eq!(got.timestamp, 2000);
        assert_eq!(registry.bucket("h1").len(), 1);
    }

    #[test]
    fn staleness_requires_every_agent_at_or_below_threshold() {
        let registry = FleetRegistry::new();
        registry.put("h1", agent("a", "1.0", 90));
        registry.put("h1", agent("b", "1.0", 95));
        assert!(registry.is_stale("h1", 100));

        registry.put("h1", agent("b", "1.0", 105));
        assert!(!registry.is_stale("h1", 100));
    }

    #[test]
    fn unknown_host_is_not_stale() {
        let registry = FleetRegistry::new();
        assert!(!registry.is_stale("ghost", i64::MAX));
    }

    #[test]
    fn evict_removes_host_and_agents() {
        let registry = FleetRegistry::new();
        registry.put("h1", agent("x", "1.0", 1000));
        registry.put("h2", agent("x", "1.0", 1000));

        registry.evict("h1");

        assert!(registry.get("h1", "x").is_none());
        assert!(!registry.hostnames().contains(&"h1".to_string()));
        assert!(registry.get("h2", "x").is_some());
    }

    #[test]
    fn status_of_covers_all_hosts() {
        let registry = FleetRegistry::new();
        registry.put("h1", agent("x", "1.0", 1000));
        registry.put("h2", agent("y", "1.0", 1000));

        let status = registry.status_of("x");
        assert_eq!(status.len(), 2);
        assert_eq!(status["h1"].as_ref().unwrap().version, "1.0");
        assert!(status["h2"].is_none());
    }

    #[test]
    fn concurrent_writes_to_different_hosts_lose_nothing() {
        let registry = Arc::new(FleetRegistry::new());
        let mut handles = Vec::new();

        for host in ["a", "b"] {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..1000 {
                    registry.put(host, agent(&format!("agent-{i}"), "1.0", i));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.bucket("a").len(), 1000);
        assert_eq!(registry.bucket("b").len(), 1000);
    }
}
