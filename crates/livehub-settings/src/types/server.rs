//! Listener, hub and connection settings.

use serde::{Deserialize, Serialize};

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Origins allowed by CORS. `"*"` allows any origin.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

/// Registry sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Outbound frames buffered per client before it is evicted.
    pub mailbox_capacity: usize,
    /// Pending register/unregister/broadcast requests before callers wait.
    pub command_queue_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            command_queue_capacity: 1024,
        }
    }
}

/// Per-connection limits and timers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
    /// Idle time after which a silent connection is dropped.
    pub read_deadline_ms: u64,
    /// Keepalive ping period. Must be shorter than `read_deadline_ms`.
    pub ping_interval_ms: u64,
    /// Upper bound on a single write to the peer.
    pub write_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_message_size: 512,
            read_deadline_ms: 60_000,
            ping_interval_ms: 54_000,
            write_timeout_ms: 10_000,
        }
    }
}
