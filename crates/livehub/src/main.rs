//! # livehub
//!
//! Server binary: loads settings, installs logging and metrics, then serves
//! channels until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use livehub_server::config::ServerConfig;
use livehub_server::server::LivehubServer;
use livehub_server::shutdown::DEFAULT_SHUTDOWN_TIMEOUT;
use livehub_settings::{LivehubSettings, LogFormat};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Live-shopping channel broadcaster.
#[derive(Parser, Debug)]
#[command(name = "livehub", about = "Live-shopping channel broadcaster")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file. Defaults to `~/.livehub/settings.json`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format: `pretty` or `json`.
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn load_settings(&self) -> Result<LivehubSettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(livehub_settings::settings_path);
        let mut settings = livehub_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        self.apply(&mut settings);
        Ok(settings)
    }

    fn apply(&self, settings: &mut LivehubSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Pretty => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    init_tracing(&settings.logging.level, settings.logging.format);

    let mut server = LivehubServer::new(ServerConfig::from_settings(&settings));
    match livehub_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics disabled"),
    }

    let addr = server
        .listen()
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}",
                settings.server.host, settings.server.port
            )
        })?;
    info!(
        %addr,
        mailbox_capacity = settings.hub.mailbox_capacity,
        max_message_size = settings.connection.max_message_size,
        "livehub ready on ws://{addr}/ws/livestream/{{channel_id}}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("shutting down");
    server.shutdown(Some(DEFAULT_SHUTDOWN_TIMEOUT)).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_overrides() {
        let cli = Cli::parse_from([
            "livehub",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--log-format",
            "json",
        ]);
        assert_eq!(cli.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert!(cli.config.is_none());
    }

    #[test]
    fn cli_rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["livehub", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn cli_overrides_win_over_settings() {
        let cli = Cli::parse_from(["livehub", "--port", "0"]);
        let mut settings = LivehubSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"hub": {"mailboxCapacity": 8}}"#).unwrap();

        let cli = Cli::parse_from(["livehub", "--config", path.to_str().unwrap()]);
        let settings = cli.load_settings().unwrap();
        assert_eq!(settings.hub.mailbox_capacity, 8);
    }

    #[test]
    fn invalid_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let cli = Cli::parse_from(["livehub", "--config", path.to_str().unwrap()]);
        assert!(cli.load_settings().is_err());
    }
}
