//! # livehub-settings
//!
//! Configuration for the livehub server, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`LivehubSettings::default()`]
//! 2. **Settings file**: `~/.livehub/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment variables**: `PORT`, `CORS_ALLOWED_ORIGINS` and the
//!    `LIVEHUB_*` family (highest priority)
//!
//! The loaded value is validated before it is returned.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = LivehubSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = LivehubSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.server.port, 8081);
        assert_eq!(settings.hub.mailbox_capacity, 256);
        assert_eq!(settings.connection.max_message_size, 512);
        assert_eq!(settings.connection.read_deadline_ms, 60_000);
        assert_eq!(settings.connection.ping_interval_ms, 54_000);
    }
}
