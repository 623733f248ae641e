use std::collections::HashMap;
use std::time::{Duration, Instant};

use lobby_core::game::AssignedNode;
use lobby_core::node::{NodeAnnouncement, NodeStatus};

/// A downstream worker that runs started games.
#[derive(Debug, Clone)]
pub struct ExecutionNode {
    pub name: String,
    pub address: String,
    pub version: String,
    pub num_games: u32,
    pub enabled: bool,
    pub disconnected: bool,
    pub last_heartbeat: Instant,
}

impl ExecutionNode {
    fn is_selectable(&self) -> bool {
        self.enabled && !self.disconnected
    }

    fn assigned(&self) -> AssignedNode {
        AssignedNode {
            name: self.name.clone(),
            address: self.address.clone(),
        }
    }
}

/// Liveness and load table of execution nodes.
#[derive(Debug)]
pub struct NodeTracker {
    nodes: HashMap<String, ExecutionNode>,
    heartbeat_timeout: Duration,
}

impl NodeTracker {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self {
            nodes: HashMap::new(),
            heartbeat_timeout,
        }
    }

    /// `node.hello`: create or refresh the node, clearing `disconnected`.
    pub fn on_hello(&mut self, announcement: &NodeAnnouncement) {
        self.on_hello_at(announcement, Instant::now());
    }

    pub fn on_hello_at(&mut self, announcement: &NodeAnnouncement, now: Instant) {
        if self.upsert(announcement, now) {
            tracing::info!(node = %announcement.name, address = %announcement.address, "Execution node registered");
        } else {
            tracing::info!(node = %announcement.name, "Execution node re-announced");
        }
    }

    /// `node.heartbeat`: same upsert as hello. Unknown names are adopted with a warning.
    pub fn on_heartbeat(&mut self, announcement: &NodeAnnouncement) {
        self.on_heartbeat_at(announcement, Instant::now());
    }

    pub fn on_heartbeat_at(&mut self, announcement: &NodeAnnouncement, now: Instant) {
        if self.upsert(announcement, now) {
            tracing::warn!(node = %announcement.name, "Heartbeat from execution node that never said hello");
        }
    }

    /// Returns true when the node was not tracked before.
    fn upsert(&mut self, announcement: &NodeAnnouncement, now: Instant) -> bool {
        match self.nodes.get_mut(&announcement.name) {
            Some(node) => {
                node.address.clone_from(&announcement.address);
                node.version.clone_from(&announcement.version);
                node.enabled = true;
                node.disconnected = false;
                node.last_heartbeat = now;
                false
            },
            None => {
                self.nodes.insert(
                    announcement.name.clone(),
                    ExecutionNode {
                        name: announcement.name.clone(),
                        address: announcement.address.clone(),
                        version: announcement.version.clone(),
                        num_games: 0,
                        enabled: true,
                        disconnected: false,
                        last_heartbeat: now,
                    },
                );
                true
            },
        }
    }

    /// Least-loaded selectable node, ties broken by name.
    pub fn select_node_for_game(&self) -> Option<&ExecutionNode> {
        self.nodes
            .values()
            .filter(|n| n.is_selectable())
            .min_by(|a, b| a.num_games.cmp(&b.num_games).then_with(|| a.name.cmp(&b.name)))
    }

    /// Select a node and charge it one game in the same step.
    pub fn claim_node_for_game(&mut self) -> Option<AssignedNode> {
        let name = self.select_node_for_game()?.name.clone();
        let node = self.nodes.get_mut(&name)?;
        node.num_games = node.num_games.saturating_add(1);
        Some(node.assigned())
    }

    /// Charge a node for a game another lobby node started on it.
    pub fn record_game(&mut self, name: &str) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.num_games = node.num_games.saturating_add(1);
        }
    }

    /// Mark nodes whose last heartbeat is older than the timeout as disconnected.
    /// Returns the names newly disconnected by this pass. Records are never removed.
    pub fn check_timeouts(&mut self) -> Vec<String> {
        self.check_timeouts_at(Instant::now())
    }

    pub fn check_timeouts_at(&mut self, now: Instant) -> Vec<String> {
        let mut evicted = Vec::new();
        for node in self.nodes.values_mut() {
            let silent_for = now.saturating_duration_since(node.last_heartbeat);
            if silent_for <= self.heartbeat_timeout {
                continue;
            }
            if node.disconnected {
                tracing::debug!(node = %node.name, secs = silent_for.as_secs(), "Execution node still silent");
                continue;
            }
            node.disconnected = true;
            tracing::error!(
                node = %node.name,
                secs = silent_for.as_secs(),
                "Execution node missed heartbeats, marking disconnected"
            );
            evicted.push(node.name.clone());
        }
        evicted.sort();
        evicted
    }

    pub fn get(&self, name: &str) -> Option<&ExecutionNode> {
        self.nodes.get(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn available_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_selectable()).count()
    }

    /// Snapshot of every tracked node, sorted by name.
    pub fn statuses(&self) -> Vec<NodeStatus> {
        let now = Instant::now();
        let mut statuses: Vec<NodeStatus> = self
            .nodes
            .values()
            .map(|n| NodeStatus {
                name: n.name.clone(),
                address: n.address.clone(),
                version: n.version.clone(),
                num_games: n.num_games,
                enabled: n.enabled,
                disconnected: n.disconnected,
                secs_since_heartbeat: now.saturating_duration_since(n.last_heartbeat).as_secs(),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobby_core::test_helpers::node_announcement;

    const TIMEOUT: Duration = Duration::from_secs(180);

    #[test]
    fn hello_registers_node() {
        let mut tracker = NodeTracker::new(TIMEOUT);
        tracker.on_hello(&node_announcement("exec-1", 9001));
        let node = tracker.get("exec-1").unwrap();
        assert!(node.enabled);
        assert!(!node.disconnected);
        assert_eq!(node.address, "127.0.0.1:9001");
        assert_eq!(node.num_games, 0);
    }

    #[test]
    fn heartbeat_from_unknown_node_is_adopted() {
        let mut tracker = NodeTracker::new(TIMEOUT);
        tracker.on_heartbeat(&node_announcement("exec-9", 9009));
        assert!(tracker.get("exec-9").is_some());
        assert_eq!(tracker.available_count(), 1);
    }

    #[test]
    fn selects_least_loaded_with_stable_tie_break() {
        let mut tracker = NodeTracker::new(TIMEOUT);
        tracker.on_hello(&node_announcement("exec-b", 9002));
        tracker.on_hello(&node_announcement("exec-a", 9001));

        assert_eq!(tracker.select_node_for_game().unwrap().name, "exec-a");
        assert_eq!(tracker.claim_node_for_game().unwrap().name, "exec-a");
        assert_eq!(tracker.claim_node_for_game().unwrap().name, "exec-b");
        assert_eq!(tracker.claim_node_for_game().unwrap().name, "exec-a");
        assert_eq!(tracker.get("exec-a").unwrap().num_games, 2);
        assert_eq!(tracker.get("exec-b").unwrap().num_games, 1);
    }

    #[test]
    fn no_node_available_when_empty() {
        let mut tracker = NodeTracker::new(TIMEOUT);
        assert!(tracker.select_node_for_game().is_none());
        assert!(tracker.claim_node_for_game().is_none());
    }

    #[test]
    fn stale_node_is_disconnected_and_excluded() {
        let mut tracker = NodeTracker::new(TIMEOUT);
        let start = Instant::now();
        tracker.on_hello_at(&node_announcement("exec-1", 9001), start);
        tracker.on_hello_at(&node_announcement("exec-2", 9002), start + Duration::from_secs(120));

        let later = start + Duration::from_secs(181);
        assert_eq!(tracker.check_timeouts_at(later), vec!["exec-1".to_string()]);
        assert!(tracker.get("exec-1").unwrap().disconnected);
        assert_eq!(tracker.select_node_for_game().unwrap().name, "exec-2");

        // Already disconnected nodes are not reported again, and the record stays.
        assert!(tracker.check_timeouts_at(later).is_empty());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn exactly_at_timeout_is_still_alive() {
        let mut tracker = NodeTracker::new(TIMEOUT);
        let start = Instant::now();
        tracker.on_hello_at(&node_announcement("exec-1", 9001), start);
        assert!(tracker.check_timeouts_at(start + TIMEOUT).is_empty());
    }

    #[test]
    fn fresh_hello_clears_disconnected() {
        let mut tracker = NodeTracker::new(TIMEOUT);
        let start = Instant::now();
        tracker.on_hello_at(&node_announcement("exec-1", 9001), start);
        tracker.check_timeouts_at(start + Duration::from_secs(600));
        assert_eq!(tracker.available_count(), 0);

        tracker.on_hello(&node_announcement("exec-1", 9100));
        let node = tracker.get("exec-1").unwrap();
        assert!(!node.disconnected);
        assert_eq!(node.address, "127.0.0.1:9100");
    }

    #[test]
    fn record_game_charges_known_nodes_only() {
        let mut tracker = NodeTracker::new(TIMEOUT);
        tracker.on_hello(&node_announcement("exec-1", 9001));
        tracker.record_game("exec-1");
        tracker.record_game("exec-unknown");
        assert_eq!(tracker.get("exec-1").unwrap().num_games, 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn statuses_sorted_by_name() {
        let mut tracker = NodeTracker::new(TIMEOUT);
        tracker.on_hello(&node_announcement("exec-z", 9002));
        tracker.on_hello(&node_announcement("exec-a", 9001));
        let names: Vec<_> = tracker.statuses().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["exec-a", "exec-z"]);
    }
}
