//! Metrics recorder for upload pipeline operations

use metrics::{counter, describe_counter, describe_gauge, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    describe_counter!(
        "uplink_sessions_started_total",
        "Total number of upload sessions admitted and started"
    );
    describe_counter!(
        "uplink_sessions_completed_total",
        "Total number of upload sessions finalized successfully"
    );
    describe_counter!(
        "uplink_sessions_failed_total",
        "Total number of upload sessions that exhausted their retry budget"
    );

    describe_counter!(
        "uplink_parts_uploaded_total",
        "Total number of parts confirmed by the storage backend"
    );
    describe_counter!("uplink_bytes_uploaded_total", "Total bytes uploaded");
    describe_counter!(
        "uplink_part_retries_total",
        "Total per-part transfer retries"
    );
    describe_counter!(
        "uplink_report_retries_total",
        "Total bookkeeping report retries"
    );

    describe_gauge!(
        "uplink_parts_in_flight",
        "Part transfers currently in flight across all sessions"
    );
}

pub fn record_session_started() {
    counter!("uplink_sessions_started_total").increment(1);
}

pub fn record_session_completed() {
    counter!("uplink_sessions_completed_total").increment(1);
}

pub fn record_session_failed() {
    counter!("uplink_sessions_failed_total").increment(1);
}

pub fn record_part_uploaded(bytes: u64) {
    counter!("uplink_parts_uploaded_total").increment(1);
    counter!("uplink_bytes_uploaded_total").increment(bytes);
}

pub fn record_part_retry() {
    counter!("uplink_part_retries_total").increment(1);
}

pub fn record_report_retry() {
    counter!("uplink_report_retries_total").increment(1);
}

pub fn record_parts_in_flight(count: usize) {
    gauge!("uplink_parts_in_flight").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_metrics();
        init_metrics();
        // Recording without an installed exporter is a no-op, not a panic
        record_session_started();
        record_part_uploaded(1024);
        record_parts_in_flight(3);
    }
}
