//! Server configuration.

use std::time::Duration;

use livehub_settings::LivehubSettings;

/// Configuration for the livehub server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Origins allowed by CORS. `"*"` allows any.
    pub cors_allowed_origins: Vec<String>,
    /// Hub loop sizing.
    pub hub: HubConfig,
    /// Per-client limits and timers.
    pub client: ClientConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            cors_allowed_origins: vec!["*".into()],
            hub: HubConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build a server configuration from loaded settings.
    pub fn from_settings(settings: &LivehubSettings) -> Self {
        let conn = &settings.connection;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            cors_allowed_origins: settings.server.cors_allowed_origins.clone(),
            hub: HubConfig {
                command_queue_capacity: settings.hub.command_queue_capacity,
            },
            client: ClientConfig {
                mailbox_capacity: settings.hub.mailbox_capacity,
                max_message_size: conn.max_message_size,
                read_deadline: Duration::from_millis(conn.read_deadline_ms),
                ping_interval: Duration::from_millis(conn.ping_interval_ms),
                write_timeout: Duration::from_millis(conn.write_timeout_ms),
            },
        }
    }
}

/// Hub loop sizing.
#[derive(Clone, Copy, Debug)]
pub struct HubConfig {
    /// Pending requests buffered before callers wait (default 1024).
    pub command_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_queue_capacity: 1024,
        }
    }
}

/// Per-client limits and timers.
#[derive(Clone, Copy, Debug)]
pub struct ClientConfig {
    /// Outbound frames buffered before the client is evicted (default 256).
    pub mailbox_capacity: usize,
    /// Largest inbound message in bytes (default 512).
    pub max_message_size: usize,
    /// Silence tolerated before the connection is dropped (default 60s).
    pub read_deadline: Duration,
    /// Keepalive ping period (default 54s).
    pub ping_interval: Duration,
    /// Bound on a single write to the peer (default 10s).
    pub write_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            max_message_size: 512,
            read_deadline: Duration::from_secs(60),
            ping_interval: Duration::from_secs(54),
            write_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_ephemeral() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_client_limits() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.mailbox_capacity, 256);
        assert_eq!(cfg.max_message_size, 512);
        assert!(cfg.ping_interval < cfg.read_deadline);
    }

    #[test]
    fn default_hub_queue() {
        assert_eq!(HubConfig::default().command_queue_capacity, 1024);
    }

    #[test]
    fn from_default_settings() {
        let cfg = ServerConfig::from_settings(&LivehubSettings::default());
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.cors_allowed_origins, vec!["*"]);
        assert_eq!(cfg.hub.command_queue_capacity, 1024);
        assert_eq!(cfg.client.mailbox_capacity, 256);
        assert_eq!(cfg.client.read_deadline, Duration::from_secs(60));
        assert_eq!(cfg.client.ping_interval, Duration::from_secs(54));
        assert_eq!(cfg.client.write_timeout, Duration::from_secs(10));
    }

    #[test]
    fn from_custom_settings() {
        let mut settings = LivehubSettings::default();
        settings.hub.mailbox_capacity = 8;
        settings.connection.max_message_size = 2048;
        settings.connection.read_deadline_ms = 1500;
        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.client.mailbox_capacity, 8);
        assert_eq!(cfg.client.max_message_size, 2048);
        assert_eq!(cfg.client.read_deadline, Duration::from_millis(1500));
    }
}
