//! Metrics for connectivity runs
//!
//! Provides OpenTelemetry counters for:
//! - dials overall (tests and errors)
//! - dials per path kind, with source/destination identity as labels

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;

use crate::outcome::{OutcomeSink, PathKind, TestOutcome};

/// Global meter for netcheck metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("netcheck"));

fn counter(name: &'static str, description: &'static str, unit: &'static str) -> Counter<u64> {
    METER
        .u64_counter(name)
        .with_description(description)
        .with_unit(unit)
        .build()
}

// ============================================================================
// Totals
// ============================================================================

/// Counter of dials of any kind
pub static TESTS_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    counter(
        "netcheck_tests_total",
        "Total number of connectivity tests",
        "{tests}",
    )
});

/// Counter of failed dials of any kind
pub static ERRORS_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    counter(
        "netcheck_errors_total",
        "Total number of failed connectivity tests",
        "{errors}",
    )
});

// ============================================================================
// Per-path dials
//
// Labels on all of them:
// - `source_node`, `destination_node`
// - `source_pod_ip`, `destination_pod_ip`
// plus `cluster_ip`, `external_ip` or `service_name` for the service paths
// ============================================================================

/// Counter of pod to pod IP dials
pub static DIAL_POD_IP: Lazy<Counter<u64>> = Lazy::new(|| {
    counter(
        "netcheck_dial_pod_ip_total",
        "Total number of pod to pod IP dials",
        "{dials}",
    )
});

/// Counter of failed pod to pod IP dials
pub static DIAL_POD_IP_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    counter(
        "netcheck_dial_pod_ip_error_total",
        "Total number of failed pod to pod IP dials",
        "{errors}",
    )
});

/// Counter of pod to cluster IP dials
pub static DIAL_CLUSTER_IP: Lazy<Counter<u64>> = Lazy::new(|| {
    counter(
        "netcheck_dial_cluster_ip_total",
        "Total number of pod to cluster IP dials",
        "{dials}",
    )
});

/// Counter of failed pod to cluster IP dials
pub static DIAL_CLUSTER_IP_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    counter(
        "netcheck_dial_cluster_ip_error_total",
        "Total number of failed pod to cluster IP dials",
        "{errors}",
    )
});

/// Counter of pod to external IP dials
pub static DIAL_EXTERNAL_IP: Lazy<Counter<u64>> = Lazy::new(|| {
    counter(
        "netcheck_dial_external_ip_total",
        "Total number of pod to external IP dials",
        "{dials}",
    )
});

/// Counter of failed pod to external IP dials
pub static DIAL_EXTERNAL_IP_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    counter(
        "netcheck_dial_external_ip_error_total",
        "Total number of failed pod to external IP dials",
        "{errors}",
    )
});

/// Counter of pod to service name dials
pub static DIAL_SERVICE_NAME: Lazy<Counter<u64>> = Lazy::new(|| {
    counter(
        "netcheck_dial_service_name_total",
        "Total number of pod to service name dials",
        "{dials}",
    )
});

/// Counter of failed pod to service name dials
pub static DIAL_SERVICE_NAME_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    counter(
        "netcheck_dial_service_name_error_total",
        "Total number of failed pod to service name dials",
        "{errors}",
    )
});

// ============================================================================
// Recording
// ============================================================================

/// Attribute key carrying the intermediate address of a path, if any
fn via_key(path: PathKind) -> Option<&'static str> {
    match path {
        PathKind::PodIp => None,
        PathKind::ClusterIp => Some("cluster_ip"),
        PathKind::ExternalIp => Some("external_ip"),
        PathKind::ServiceName => Some("service_name"),
    }
}

/// Metric attributes for one outcome
pub fn outcome_attributes(outcome: &TestOutcome) -> Vec<KeyValue> {
    let mut attrs = vec![
        KeyValue::new("source_node", outcome.source_node.clone()),
        KeyValue::new("destination_node", outcome.destination_node.clone()),
        KeyValue::new("source_pod_ip", outcome.source_address.clone()),
        KeyValue::new("destination_pod_ip", outcome.destination_address.clone()),
    ];
    if let Some(key) = via_key(outcome.path) {
        attrs.push(KeyValue::new(
            key,
            outcome.via.clone().unwrap_or_default(),
        ));
    }
    attrs
}

/// [`OutcomeSink`] that updates the counters above
#[derive(Debug, Default)]
pub struct MetricsSink;

impl OutcomeSink for MetricsSink {
    fn record(&self, outcome: &TestOutcome) {
        let (dials, errors) = match outcome.path {
            PathKind::PodIp => (&*DIAL_POD_IP, &*DIAL_POD_IP_ERRORS),
            PathKind::ClusterIp => (&*DIAL_CLUSTER_IP, &*DIAL_CLUSTER_IP_ERRORS),
            PathKind::ExternalIp => (&*DIAL_EXTERNAL_IP, &*DIAL_EXTERNAL_IP_ERRORS),
            PathKind::ServiceName => (&*DIAL_SERVICE_NAME, &*DIAL_SERVICE_NAME_ERRORS),
        };
        let attrs = outcome_attributes(outcome);

        TESTS_TOTAL.add(1, &[]);
        dials.add(1, &attrs);
        if !outcome.is_success() {
            ERRORS_TOTAL.add(1, &[]);
            errors.add(1, &attrs);
        }
    }
}
