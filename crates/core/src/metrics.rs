//! Metric names and descriptions.
//!
//! Every crate records through the `metrics` facade using these constants;
//! the daemon installs the exporter and calls [`describe_all`].
//!
//! Naming: `cnm_` prefix, `_total` suffix for counters, `_seconds` for
//! latency histograms.

// ─── label keys ─────────────────────────────────────────────────────

/// Protocol operation (CreateNetwork, CreateEndpoint, ...)
pub const LABEL_OPERATION: &str = "operation";

/// Port notification action (add, delete)
pub const LABEL_ACTION: &str = "action";

/// success, failure
pub const LABEL_RESULT: &str = "result";

// ─── protocol server ────────────────────────────────────────────────

/// Protocol requests handled (counter, label: operation)
pub const REQUESTS_TOTAL: &str = "cnm_requests_total";

/// Protocol requests answered with an error (counter, label: operation)
pub const REQUEST_ERRORS_TOTAL: &str = "cnm_request_errors_total";

/// Protocol request latency (histogram, seconds, label: operation)
pub const REQUEST_DURATION_SECONDS: &str = "cnm_request_duration_seconds";

// ─── driver ─────────────────────────────────────────────────────────

/// Detached agent notifications (counter, labels: action, result)
pub const PORT_NOTIFICATIONS_TOTAL: &str = "cnm_port_notifications_total";

/// Host network creation retries after a recoverable error (counter)
pub const HOST_CREATE_RETRIES_TOTAL: &str = "cnm_host_create_retries_total";

/// Time spent waiting for the adapter to reacquire an address (histogram, seconds)
pub const ADAPTER_WAIT_SECONDS: &str = "cnm_adapter_wait_seconds";

// ─── daemon ─────────────────────────────────────────────────────────

/// Build info, always 1 (gauge, label: version)
pub const DAEMON_BUILD_INFO: &str = "cnm_daemon_build_info";

/// Registers descriptions for every metric above.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(REQUESTS_TOTAL, "Protocol requests handled per operation");
    describe_counter!(
        REQUEST_ERRORS_TOTAL,
        "Protocol requests answered with an error per operation"
    );
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        "Protocol request handling latency in seconds"
    );
    describe_counter!(
        PORT_NOTIFICATIONS_TOTAL,
        "Detached dataplane agent notifications by action and result"
    );
    describe_counter!(
        HOST_CREATE_RETRIES_TOTAL,
        "Host network creation retries after a recoverable host error"
    );
    describe_histogram!(
        ADAPTER_WAIT_SECONDS,
        "Time spent waiting for the adapter to reacquire an IPv4 address"
    );
    describe_gauge!(DAEMON_BUILD_INFO, "Daemon build information");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_all_without_recorder_is_a_noop() {
        describe_all();
    }

    #[test]
    fn names_follow_convention() {
        for name in [
            REQUESTS_TOTAL,
            REQUEST_ERRORS_TOTAL,
            PORT_NOTIFICATIONS_TOTAL,
            HOST_CREATE_RETRIES_TOTAL,
        ] {
            assert!(name.starts_with("cnm_"));
            assert!(name.ends_with("_total"));
        }
        assert!(REQUEST_DURATION_SECONDS.ends_with("_seconds"));
        assert!(ADAPTER_WAIT_SECONDS.ends_with("_seconds"));
    }
}
