use serde::{Deserialize, Serialize};

/// Identity an execution node announces on `node.hello` / `node.heartbeat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAnnouncement {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub version: String,
}

/// Point-in-time view of a tracked execution node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub name: String,
    pub address: String,
    pub version: String,
    pub num_games: u32,
    pub enabled: bool,
    pub disconnected: bool,
    pub secs_since_heartbeat: u64,
}
