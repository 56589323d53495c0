use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests executed. Labels: command, status.
pub const REQUESTS_TOTAL: &str = "slotd_requests_total";

/// Histogram: request latency in seconds. Labels: command.
pub const REQUEST_DURATION_SECONDS: &str = "slotd_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotd_connections_rejected_total";

/// Gauge: number of active practices (loaded engines).
pub const PRACTICES_ACTIVE: &str = "slotd_practices_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotd_wal_flush_batch_size";

// ── Booking funnel ───────────────────────────────────────────────

/// Counter: holds that reached Held.
pub const HOLDS_PLACED_TOTAL: &str = "slotd_holds_placed_total";

/// Counter: holds confirmed into appointments.
pub const HOLDS_CONFIRMED_TOTAL: &str = "slotd_holds_confirmed_total";

/// Counter: holds that expired (TTL or failed commit).
pub const HOLDS_EXPIRED_TOTAL: &str = "slotd_holds_expired_total";

/// Counter: holds cancelled by the user.
pub const HOLDS_CANCELLED_TOTAL: &str = "slotd_holds_cancelled_total";

/// Counter: confirms that lost the commit-time re-validation.
pub const COMMIT_CONFLICTS_TOTAL: &str = "slotd_commit_conflicts_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Request variant to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::Attach { .. } => "attach",
        Request::RegisterConsultant { .. } => "register_consultant",
        Request::SetWorkingHours { .. } => "set_working_hours",
        Request::UpdateSettings { .. } => "update_settings",
        Request::GetHours { .. } => "get_hours",
        Request::ListConsultants => "list_consultants",
        Request::GetAvailableSlots { .. } => "get_available_slots",
        Request::ResolveAvailability { .. } => "resolve_availability",
        Request::CreateAppointment { .. } => "create_appointment",
        Request::GetAppointment { .. } => "get_appointment",
        Request::ListAppointments { .. } => "list_appointments",
        Request::UpdateAppointment { .. } => "update_appointment",
        Request::CancelAppointment { .. } => "cancel_appointment",
        Request::Reschedule { .. } => "reschedule",
        Request::OpenBooking { .. } => "open_booking",
        Request::SubmitBooking { .. } => "submit_booking",
        Request::PlaceHold { .. } => "place_hold",
        Request::ConfirmBooking { .. } => "confirm_booking",
        Request::CancelBooking { .. } => "cancel_booking",
        Request::GetHold { .. } => "get_hold",
        Request::Subscribe { .. } => "subscribe",
    }
}
