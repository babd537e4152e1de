//! Metric definitions for the authorization service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `extauth_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded enums:
//! - `decision`: allow, deny, not_found, invalid
//! - `status`: success, error (issuance, reconciliation) or an HTTP status class
//! - `document`: discovery, jwks

use metrics::counter;

/// Record the outcome of a check request
///
/// Metric: `extauth_check_decisions_total`
/// Labels: `decision`
pub fn record_check_decision(decision: &'static str) {
    counter!("extauth_check_decisions_total", "decision" => decision).increment(1);
}

/// Record a wristband issuance attempt
///
/// Metric: `extauth_wristband_issuance_total`
/// Labels: `status`
pub fn record_wristband_issuance(status: &'static str) {
    counter!("extauth_wristband_issuance_total", "status" => status).increment(1);
}

/// Record a metadata document request
///
/// Metric: `extauth_metadata_requests_total`
/// Labels: `document`, `status`
pub fn record_metadata_request(document: &'static str, status: &'static str) {
    counter!("extauth_metadata_requests_total", "document" => document, "status" => status)
        .increment(1);
}

/// Record a route document reconciliation
///
/// Metric: `extauth_reconciliations_total`
/// Labels: `status`
pub fn record_reconciliation(status: &'static str) {
    counter!("extauth_reconciliations_total", "status" => status).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    type Snapshot = Vec<(
        metrics_util::CompositeKey,
        Option<metrics::Unit>,
        Option<metrics::SharedString>,
        DebugValue,
    )>;

    fn counter_value(snapshot: &Snapshot, name: &str) -> u64 {
        snapshot
            .iter()
            .filter(|(key, _, _, _)| key.key().name() == name)
            .map(|(_, _, _, value)| match value {
                DebugValue::Counter(v) => *v,
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn test_counters_are_recorded() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_check_decision("allow");
            record_check_decision("deny");
            record_wristband_issuance("success");
            record_metadata_request("jwks", "200");
            record_reconciliation("success");
            record_reconciliation("error");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        assert_eq!(counter_value(&snapshot, "extauth_check_decisions_total"), 2);
        assert_eq!(counter_value(&snapshot, "extauth_wristband_issuance_total"), 1);
        assert_eq!(counter_value(&snapshot, "extauth_metadata_requests_total"), 1);
        assert_eq!(counter_value(&snapshot, "extauth_reconciliations_total"), 2);
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_check_decision("not_found");
        record_wristband_issuance("error");
        record_metadata_request("discovery", "404");
    }
}
