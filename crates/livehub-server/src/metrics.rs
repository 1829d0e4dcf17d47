//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from a recorder handle.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections accepted and registered (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Clients in the hub registry (gauge).
pub const HUB_CLIENTS_ACTIVE: &str = "hub_clients_active";
/// Channel fan-outs performed (counter).
pub const HUB_BROADCASTS_TOTAL: &str = "hub_broadcasts_total";
/// Frames queued onto client mailboxes (counter).
pub const HUB_DELIVERIES_TOTAL: &str = "hub_deliveries_total";
/// Clients removed without a leave event (counter, labels: reason).
pub const HUB_EVICTIONS_TOTAL: &str = "hub_evictions_total";
/// Text frames received from clients (counter).
pub const INBOUND_MESSAGES_TOTAL: &str = "inbound_messages_total";
/// Inbound frames dropped (counter, labels: reason).
pub const INBOUND_DROPPED_TOTAL: &str = "inbound_dropped_total";
/// Frames written to clients (counter).
pub const OUTBOUND_FRAMES_TOTAL: &str = "outbound_frames_total";
/// Announcements accepted over HTTP (counter).
pub const ANNOUNCEMENTS_TOTAL: &str = "announcements_total";
