//! Settings types.

mod logging;
mod server;

pub use logging::{LogFormat, LoggingSettings};
pub use server::{ConnectionSettings, HubSettings, ServerSettings};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivehubSettings {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Registry and mailbox sizing.
    pub hub: HubSettings,
    /// Per-connection limits and timers.
    pub connection: ConnectionSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl LivehubSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.hub.mailbox_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.mailboxCapacity must be greater than 0".into(),
            ));
        }
        if self.hub.command_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.commandQueueCapacity must be greater than 0".into(),
            ));
        }
        if self.connection.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "connection.maxMessageSize must be greater than 0".into(),
            ));
        }
        if self.connection.write_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "connection.writeTimeoutMs must be greater than 0".into(),
            ));
        }
        if self.connection.ping_interval_ms == 0
            || self.connection.ping_interval_ms >= self.connection.read_deadline_ms
        {
            return Err(SettingsError::InvalidValue(format!(
                "connection.pingIntervalMs ({}) must be non-zero and shorter than connection.readDeadlineMs ({})",
                self.connection.ping_interval_ms, self.connection.read_deadline_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        LivehubSettings::default().validate().unwrap();
    }

    #[test]
    fn ping_must_be_shorter_than_read_deadline() {
        let mut s = LivehubSettings::default();
        s.connection.ping_interval_ms = s.connection.read_deadline_ms;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("pingIntervalMs"));
    }

    #[test]
    fn zero_mailbox_rejected() {
        let mut s = LivehubSettings::default();
        s.hub.mailbox_capacity = 0;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn zero_command_queue_rejected() {
        let mut s = LivehubSettings::default();
        s.hub.command_queue_capacity = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn zero_message_size_rejected() {
        let mut s = LivehubSettings::default();
        s.connection.max_message_size = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(LivehubSettings::default()).unwrap();
        assert_eq!(v["hub"]["mailboxCapacity"], 256);
        assert_eq!(v["connection"]["readDeadlineMs"], 60_000);
        assert_eq!(v["server"]["corsAllowedOrigins"][0], "*");
        assert_eq!(v["logging"]["format"], "pretty");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: LivehubSettings =
            serde_json::from_str(r#"{"server": {"port": 9000}}"#).unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.hub.mailbox_capacity, 256);
    }
}
