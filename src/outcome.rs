//! Test outcomes and the sinks that receive them
//!
//! Every dial produces exactly one [`TestOutcome`]. Outcomes carry their own
//! source/destination identity so nothing about the last dial is kept in
//! shared state; sinks (console report, metrics) receive the full record.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::Error;

/// The network path a dial exercises
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PathKind {
    /// Pod dials another pod's IP directly
    PodIp,
    /// Pod dials a service's cluster IP
    ClusterIp,
    /// Pod dials a service's external IP
    ExternalIp,
    /// Pod dials a service by DNS name
    ServiceName,
}

impl PathKind {
    /// Stable identifier used in logs and metric attributes
    pub fn as_str(&self) -> &'static str {
        match self {
            PathKind::PodIp => "pod-ip",
            PathKind::ClusterIp => "cluster-ip",
            PathKind::ExternalIp => "external-ip",
            PathKind::ServiceName => "service-name",
        }
    }
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded result of one dial attempt
#[derive(Clone, Debug, PartialEq)]
pub struct TestOutcome {
    /// Path kind of the dial
    pub path: PathKind,
    /// Node the source pod runs on
    pub source_node: String,
    /// Source pod IP
    pub source_address: String,
    /// Node the destination pod runs on
    pub destination_node: String,
    /// Destination pod IP (for services, the IP of the backing pod)
    pub destination_address: String,
    /// Intermediate address for service paths: cluster IP, external IP or service name
    pub via: Option<String>,
    /// Error detail when the dial failed
    pub error: Option<String>,
}

impl TestOutcome {
    /// Whether the dial succeeded
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// "success" or "failure"
    pub fn result(&self) -> &'static str {
        if self.is_success() {
            "success"
        } else {
            "failure"
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let via = self.via.as_deref().unwrap_or_default();
        match self.path {
            PathKind::PodIp => write!(
                f,
                "[{}] {:>30} --> {:<30}   {:<15} --> {:<15}",
                self.result(),
                self.source_node,
                self.destination_node,
                self.source_address,
                self.destination_address
            ),
            PathKind::ClusterIp => write!(
                f,
                "[{}] {:>30} --> ClusterIP --> {:<30}   {:<15} --> {:<15} --> {:<15}",
                self.result(),
                self.source_node,
                self.destination_node,
                self.source_address,
                via,
                self.destination_address
            ),
            PathKind::ExternalIp => write!(
                f,
                "[{}] {:>30} --> ExternalIP --> {:<30}   {:<15} --> {:<15} --> {:<15}",
                self.result(),
                self.source_node,
                self.destination_node,
                self.source_address,
                via,
                self.destination_address
            ),
            PathKind::ServiceName => write!(
                f,
                "[{}] {:>30} --> Service Name    {:<15} --> {:<15} --> {:<15}",
                self.result(),
                self.source_node,
                self.source_address,
                via,
                self.destination_address
            ),
        }
    }
}

/// Aggregated failing outcomes of one or more matrix passes
///
/// Aggregation is accumulate-all: every failing outcome is kept, in whatever
/// order workers finished. Equality of two reports does not depend on order.
#[derive(Clone, Debug, Default)]
pub struct DialFailures {
    failures: Vec<TestOutcome>,
}

impl DialFailures {
    /// Record an outcome; successful outcomes are ignored
    pub fn push(&mut self, outcome: TestOutcome) {
        if !outcome.is_success() {
            self.failures.push(outcome);
        }
    }

    /// Merge another report into this one
    pub fn extend(&mut self, other: DialFailures) {
        self.failures.extend(other.failures);
    }

    /// Number of failing dials
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// True when no dial failed
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Iterate over the failing outcomes
    pub fn iter(&self) -> impl Iterator<Item = &TestOutcome> {
        self.failures.iter()
    }

    /// `Ok(())` when nothing failed, otherwise [`Error::Dial`]
    pub fn into_result(self) -> Result<(), Error> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Dial(self))
        }
    }
}

impl PartialEq for DialFailures {
    fn eq(&self, other: &Self) -> bool {
        if self.failures.len() != other.failures.len() {
            return false;
        }
        let mut remaining: Vec<&TestOutcome> = other.failures.iter().collect();
        self.failures.iter().all(|outcome| {
            match remaining.iter().position(|candidate| *candidate == outcome) {
                Some(idx) => {
                    remaining.swap_remove(idx);
                    true
                }
                None => false,
            }
        })
    }
}

impl fmt::Display for DialFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} dial(s) failed", self.failures.len())?;
        for outcome in &self.failures {
            write!(
                f,
                "\n  - {} {} ({}) --> {} ({})",
                outcome.path,
                outcome.source_node,
                outcome.source_address,
                outcome.destination_node,
                outcome.via.as_deref().unwrap_or(&outcome.destination_address),
            )?;
            if let Some(err) = &outcome.error {
                write!(f, ": {}", err)?;
            }
        }
        Ok(())
    }
}

/// Receives every recorded outcome
///
/// Implementations must be cheap and non-blocking; they are called from the
/// matrix workers as soon as each dial finishes.
pub trait OutcomeSink: Send + Sync {
    /// Record one outcome
    fn record(&self, outcome: &TestOutcome);

    /// A matrix pass with the given header is about to dial
    fn pass_started(&self, _title: &str) {}
}

/// Prints one report line per outcome on stdout
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl OutcomeSink for ConsoleSink {
    fn record(&self, outcome: &TestOutcome) {
        if let Some(err) = &outcome.error {
            debug!(path = %outcome.path, error = %err, "dial failed");
        }
        println!("{}", outcome);
    }

    fn pass_started(&self, title: &str) {
        println!("{}", title);
    }
}

/// Forwards every outcome to several sinks
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn OutcomeSink>>,
}

impl FanoutSink {
    /// Create an empty fan-out
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    pub fn with(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl OutcomeSink for FanoutSink {
    fn record(&self, outcome: &TestOutcome) {
        for sink in &self.sinks {
            sink.record(outcome);
        }
    }

    fn pass_started(&self, title: &str) {
        for sink in &self.sinks {
            sink.pass_started(title);
        }
    }
}
