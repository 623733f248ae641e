use std::time::Duration;

use serde::Deserialize;

/// Top-level lobby node configuration, loaded from `lobby.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    /// Process-wide identity stamped on every bus record this node publishes.
    pub node_name: String,
    pub listen_addr: String,
    pub auth: AuthFileConfig,
    pub nodes: NodesConfig,
    pub limits: LimitsConfig,
    pub store: StoreConfig,
    pub bus: BusConfig,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            listen_addr: "0.0.0.0:8080".to_string(),
            auth: AuthFileConfig::default(),
            nodes: NodesConfig::default(),
            limits: LimitsConfig::default(),
            store: StoreConfig::default(),
            bus: BusConfig::default(),
        }
    }
}

fn default_node_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("lobby-{}", &id[..8])
}

/// Token signing and REST authentication.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthFileConfig {
    /// Shared HS256 secret for hand-off credentials and lobby tokens.
    pub token_secret: String,
    pub issuer: String,
    pub handoff_ttl_secs: u64,
    /// Bearer token for REST API access. None = auth disabled.
    pub bearer_token: Option<String>,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            token_secret: "dev-secret-change-me".to_string(),
            issuer: "lobby".to_string(),
            handoff_ttl_secs: 7200,
            bearer_token: None,
        }
    }
}

/// Execution-node liveness tracking.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodesConfig {
    pub monitor_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
}

impl Default for NodesConfig {
    fn default() -> Self {
        Self {
            monitor_interval_secs: 60,
            heartbeat_timeout_secs: 180,
        }
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    pub client_message_buffer: usize,
    pub ws_rate_limit_per_sec: f64,
    pub bus_capacity: usize,
    pub max_chat_messages: usize,
    pub max_chat_length: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 1000,
            client_message_buffer: 256,
            ws_rate_limit_per_sec: 20.0,
            bus_capacity: 1024,
            max_chat_messages: 200,
            max_chat_length: 512,
        }
    }
}

/// Durable game store. No path = in-memory only.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<String>,
}

/// Replication transport. No NATS URL = in-process bus, single node only.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub nats_url: Option<String>,
    /// Subject prefix shared by every lobby node of one deployment.
    pub subject_prefix: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            nats_url: None,
            subject_prefix: "lobby".to_string(),
        }
    }
}

impl LobbyConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.nodes.heartbeat_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.nodes.monitor_interval_secs)
    }

    pub fn handoff_ttl(&self) -> Duration {
        Duration::from_secs(self.auth.handoff_ttl_secs)
    }

    /// Collect every configuration problem that makes the node unusable.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.node_name.trim().is_empty() {
            problems.push("node_name must not be empty".to_string());
        }
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            problems.push(format!(
                "listen_addr {:?} is not a valid socket address",
                self.listen_addr
            ));
        }
        if self.auth.token_secret.is_empty() {
            problems.push("auth.token_secret must not be empty".to_string());
        }
        if self.auth.handoff_ttl_secs == 0 {
            problems.push("auth.handoff_ttl_secs must be > 0".to_string());
        }
        if self.nodes.monitor_interval_secs == 0 {
            problems.push("nodes.monitor_interval_secs must be > 0".to_string());
        }
        if self.nodes.heartbeat_timeout_secs == 0 {
            problems.push("nodes.heartbeat_timeout_secs must be > 0".to_string());
        }
        if self.limits.max_ws_connections == 0 {
            problems.push("limits.max_ws_connections must be > 0".to_string());
        }
        if self.limits.client_message_buffer == 0 {
            problems.push("limits.client_message_buffer must be > 0".to_string());
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            problems.push("limits.ws_rate_limit_per_sec must be > 0".to_string());
        }
        if self.limits.bus_capacity == 0 {
            problems.push("limits.bus_capacity must be > 0".to_string());
        }
        if self.limits.max_chat_messages == 0 {
            problems.push("limits.max_chat_messages must be > 0".to_string());
        }
        if self.limits.max_chat_length == 0 {
            problems.push("limits.max_chat_length must be > 0".to_string());
        }
        let prefix = &self.bus.subject_prefix;
        if prefix.is_empty()
            || prefix.starts_with('.')
            || prefix.ends_with('.')
            || prefix.contains(|c: char| c == '*' || c == '>' || c.is_whitespace())
        {
            problems.push(format!(
                "bus.subject_prefix {prefix:?} is not a valid subject prefix"
            ));
        }
        problems
    }

    /// Validate configuration, exiting on unusable values and warning on risky ones.
    pub fn validate(&self) {
        let problems = self.problems();
        for problem in &problems {
            tracing::error!("{problem}");
        }
        if !problems.is_empty() {
            std::process::exit(1);
        }

        if self.auth.token_secret == AuthFileConfig::default().token_secret {
            tracing::warn!(
                "auth.token_secret is the development default; set LOBBY_TOKEN_SECRET in production"
            );
        }
        if self.auth.bearer_token.is_some() {
            tracing::warn!(
                "bearer_token is set in config file; use LOBBY_API_TOKEN env var in production"
            );
        }
        if self.nodes.heartbeat_timeout_secs < self.nodes.monitor_interval_secs {
            tracing::warn!(
                timeout = self.nodes.heartbeat_timeout_secs,
                interval = self.nodes.monitor_interval_secs,
                "Heartbeat timeout is shorter than the monitor interval"
            );
        }
    }

    /// Load config from `lobby.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let config = match std::fs::read_to_string("lobby.toml") {
            Ok(content) => match toml::from_str::<LobbyConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from lobby.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse lobby.toml: {e}, using defaults");
                    LobbyConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No lobby.toml found, using defaults");
                LobbyConfig::default()
            },
        };
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `LOBBY_*` overrides read through `lookup`.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(name) = var("LOBBY_NODE_NAME") {
            self.node_name = name;
        }
        if let Some(addr) = var("LOBBY_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(secret) = var("LOBBY_TOKEN_SECRET") {
            self.auth.token_secret = secret;
        }
        if let Some(token) = var("LOBBY_API_TOKEN") {
            self.auth.bearer_token = Some(token);
        }
        if let Some(path) = var("LOBBY_STORE_PATH") {
            self.store.path = Some(path);
        }
        if let Some(url) = var("LOBBY_NATS_URL") {
            self.bus.nats_url = Some(url);
        }
        if let Some(val) = var("LOBBY_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.limits.max_ws_connections = n;
        }
        if let Some(val) = var("LOBBY_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            self.limits.ws_rate_limit_per_sec = n;
        }
        self
    }
}
