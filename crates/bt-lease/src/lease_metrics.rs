//! Lease metrics
//!
//! Loss and graceful release are separate series so a dashboard can tell a
//! hand-off caused by a fault from a planned shutdown.

use metrics::{counter, gauge};

pub fn record_acquired(key: &str) {
    counter!("baton_lease_acquired_total", "key" => key.to_string()).increment(1);
    gauge!("baton_lease_holding", "key" => key.to_string()).set(1.0);
}

pub fn record_standby(key: &str) {
    counter!("baton_lease_standby_total", "key" => key.to_string()).increment(1);
}

pub fn record_renewed(key: &str) {
    counter!("baton_lease_renewed_total", "key" => key.to_string()).increment(1);
}

/// `reason` is "ownership" or "backend_error"
pub fn record_lost(key: &str, reason: &'static str) {
    counter!(
        "baton_lease_lost_total",
        "key" => key.to_string(),
        "reason" => reason
    )
    .increment(1);
    gauge!("baton_lease_holding", "key" => key.to_string()).set(0.0);
}

pub fn record_released(key: &str, deleted: bool) {
    counter!(
        "baton_lease_released_total",
        "key" => key.to_string(),
        "deleted" => deleted.to_string()
    )
    .increment(1);
    gauge!("baton_lease_holding", "key" => key.to_string()).set(0.0);
}

pub fn record_backend_error(key: &str, op: &'static str) {
    counter!(
        "baton_lease_backend_errors_total",
        "key" => key.to_string(),
        "op" => op
    )
    .increment(1);
}
