//! Metrics and observability module
//!
//! Records upload pipeline metrics through the `metrics` facade; the
//! embedding application decides which exporter (if any) to install.
//!
//! Key metrics exposed:
//! - Session lifecycle (started, completed, failed)
//! - Part operations (uploaded, retried, reports retried)
//! - Throughput (bytes uploaded)
//! - In-flight part transfers

pub mod recorder;

pub use recorder::{
    init_metrics, record_part_retry, record_part_uploaded, record_parts_in_flight,
    record_report_retry, record_session_completed, record_session_failed,
    record_session_started,
};
