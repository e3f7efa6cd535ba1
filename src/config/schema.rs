//! Configuration schema definitions.
//!
//! One file configures every role (backend, proxy, chat, p2p); each role
//! reads the sections it needs. All types derive Serde traits for
//! deserialization from TOML and every section has defaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Wire codec size limits.
    pub limits: LimitsConfig,

    /// Session store settings.
    pub session: SessionConfig,

    /// Credential checking.
    pub auth: AuthConfig,

    /// Reverse proxy settings.
    pub proxy: ProxyConfig,

    /// Chat-app tracker settings.
    pub chat: ChatConfig,

    /// P2P node settings.
    pub p2p: P2pConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 1_024,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Outbound connection establishment timeout in seconds (upstream, P2P).
    pub connect_secs: u64,

    /// Idle keep-alive connection timeout in seconds.
    pub idle_secs: u64,

    /// Time allowed for the upstream to answer a forwarded request, in seconds.
    pub upstream_secs: u64,

    /// P2P handshake timeout in seconds.
    pub handshake_secs: u64,

    /// Time allowed for one frame write on a P2P link, in seconds. A peer
    /// that stops reading loses its link once this elapses.
    pub p2p_write_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            idle_secs: 30,
            upstream_secs: 30,
            handshake_secs: 5,
            p2p_write_secs: 5,
        }
    }
}

/// Size limits enforced by the wire codec.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum size of the start line plus header block in bytes.
    pub max_header_bytes: usize,

    /// Maximum body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 16 * 1024,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Session store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session lifetime in seconds.
    pub ttl_secs: u64,

    /// How often expired sessions are swept, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3_600,
            sweep_interval_secs: 60,
        }
    }
}

/// Credential checking configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accept any non-empty username/password pair.
    pub open: bool,

    /// Username → password table used when `open` is false.
    pub users: BTreeMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        let mut users = BTreeMap::new();
        // WARNING: demo credentials. Override in any real deployment.
        users.insert("admin".to_string(), "password".to_string());
        Self { open: false, users }
    }
}

/// Reverse proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Upstream backend address (e.g., "127.0.0.1:9000").
    pub upstream: String,

    /// Replace the `Host` header with this value before forwarding.
    pub host_rewrite: Option<String>,

    /// Idle upstream connections kept for reuse.
    pub max_idle_connections: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream: "127.0.0.1:9000".to_string(),
            host_rewrite: None,
            max_idle_connections: 16,
        }
    }
}

/// Chat-app (client–server mode) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Channel used by broadcasts that name none.
    pub default_channel: String,

    /// Peers not seen for this many seconds are marked disconnected.
    pub peer_ttl_secs: u64,

    /// How often idle peers are swept, in seconds.
    pub sweep_interval_secs: u64,

    /// Maximum pending messages per mailbox; oldest are dropped beyond it.
    pub mailbox_capacity: usize,

    /// Default number of messages returned from a channel history.
    pub history_limit: usize,

    /// Messages retained per channel; oldest are dropped beyond it.
    pub history_capacity: usize,

    /// Accept any non-empty credentials at `/login` instead of `auth.users`.
    pub open_auth: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_channel: "general".to_string(),
            peer_ttl_secs: 300,
            sweep_interval_secs: 60,
            mailbox_capacity: 1_000,
            history_limit: 50,
            history_capacity: 1_000,
            open_auth: true,
        }
    }
}

/// P2P node configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct P2pConfig {
    /// This node's peer identifier.
    pub peer_id: String,

    /// Address the node listens on for inbound links.
    pub listen_address: String,

    /// Optional chat-app tracker to announce this node to (e.g. "http://127.0.0.1:8001").
    pub tracker_url: Option<String>,

    /// Credentials used to log into the tracker.
    pub tracker_user: String,
    pub tracker_password: String,

    /// Received messages kept until drained; oldest are dropped beyond it.
    pub inbox_capacity: usize,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            peer_id: "peer".to_string(),
            listen_address: "0.0.0.0:5000".to_string(),
            tracker_url: None,
            tracker_user: "peer".to_string(),
            tracker_password: "peer".to_string(),
            inbox_capacity: 1_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
