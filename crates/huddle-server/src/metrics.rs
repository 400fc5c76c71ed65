//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Inbound messages routed to a handler (counter, labels: name).
pub const MESSAGES_DISPATCHED_TOTAL: &str = "messages_dispatched_total";
/// Inbound messages with no handler (counter).
pub const MESSAGES_UNKNOWN_TOTAL: &str = "messages_unknown_total";
/// Inbound frames that were not a valid envelope (counter).
pub const MESSAGES_MALFORMED_TOTAL: &str = "messages_malformed_total";
/// Handler invocations that failed (counter, labels: name).
pub const HANDLER_ERRORS_TOTAL: &str = "handler_errors_total";
/// Running subscription tasks (gauge).
pub const SUBSCRIPTIONS_ACTIVE: &str = "subscriptions_active";
/// Change events delivered to sessions (counter, labels: kind, op).
pub const CHANGE_EVENTS_TOTAL: &str = "change_events_total";
