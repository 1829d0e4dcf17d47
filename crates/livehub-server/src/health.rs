//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Name reported by the liveness probe.
pub const SERVICE_NAME: &str = "livehub";

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Service name.
    pub service: &'static str,
}

/// Build a liveness response. Does not touch the hub.
pub fn health_check(start_time: Instant) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        service: SERVICE_NAME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        assert_eq!(health_check(Instant::now()).status, "ok");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(health_check(start).uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let parsed = serde_json::to_value(health_check(Instant::now())).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["service"], "livehub");
        assert!(parsed["uptime_secs"].is_number());
    }
}
