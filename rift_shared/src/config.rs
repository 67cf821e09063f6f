//! Configuration system.
//!
//! Loads server configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

/// Root configuration for the server process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// UDP listen address, e.g. `0.0.0.0:12345`.
    pub bind_addr: String,
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// Reliability maintenance cadence (retransmit sweep, pending acks).
    #[serde(default = "default_reliability_interval_ms")]
    pub reliability_interval_ms: u64,
    /// A peer with no inbound traffic and nothing in flight for this long is
    /// reaped.
    #[serde(default = "default_stale_timeout_ms")]
    pub stale_timeout_ms: u64,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Sent in `JoinSuccess`.
    #[serde(default = "default_welcome_text")]
    pub welcome_text: String,
}

fn default_reliability_interval_ms() -> u64 {
    20
}

fn default_stale_timeout_ms() -> u64 {
    60_000
}

fn default_max_clients() -> usize {
    64
}

fn default_welcome_text() -> String {
    "Welcome to RiftForged!".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:12345".to_string(),
            tick_hz: 100,
            reliability_interval_ms: default_reliability_interval_ms(),
            stale_timeout_ms: default_stale_timeout_ms(),
            max_clients: default_max_clients(),
            welcome_text: default_welcome_text(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Duration of one simulation tick.
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.tick_hz.max(1) as f64)
    }
}
