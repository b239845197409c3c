//! Connectivity matrix executor
//!
//! A pass dials every (source, destination) pair of one path kind whose
//! host-network flags match the pass's combination. Pairs are enumerated once
//! per path kind as a full cross product; the host-network filter is applied
//! by the worker that picks a pair up. Workers run on a bounded pool and every
//! outcome is collected before the pass aggregates failures, so a failing
//! dial never stops the rest of the pass.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::ClusterView;
use crate::config::Settings;
use crate::dial::Dialer;
use crate::outcome::{DialFailures, OutcomeSink, PathKind, TestOutcome};
use crate::{Error, Result, LABEL_HOST_NETWORK};

/// Destination of one dial
#[derive(Clone, Debug)]
pub enum Target {
    /// Another probe pod, dialed on its pod IP
    Pod(Arc<Pod>),
    /// A probe service, dialed on its cluster IP, external IP or name
    Service(Arc<Service>),
}

/// One candidate dial
#[derive(Clone, Debug)]
pub struct Pair {
    /// Pod the dial runs in
    pub source: Arc<Pod>,
    /// What the source dials
    pub target: Target,
}

/// Result of one pass
#[derive(Debug, Default)]
pub struct PassReport {
    /// Pairs that passed the host-network filter and were dialed
    pub dispatched: usize,
    /// Failing outcomes of the pass
    pub failures: DialFailures,
}

enum Dispatch {
    Skipped,
    Interrupted,
    Dialed(TestOutcome),
}

/// Runs matrix passes on a bounded worker pool
#[derive(Clone)]
pub struct MatrixExecutor {
    dialer: Dialer,
    sink: Arc<dyn OutcomeSink>,
    workers: usize,
}

impl MatrixExecutor {
    /// Create an executor running at most `workers` dials at once
    pub fn new(dialer: Dialer, sink: Arc<dyn OutcomeSink>, workers: usize) -> Self {
        Self {
            dialer,
            sink,
            workers: workers.max(1),
        }
    }

    /// Run every enabled pass in order: pods, services, service name, external IPs
    ///
    /// Failures of all passes are combined into one [`Error::Dial`]. An
    /// interrupted pass ends the run immediately with [`Error::Interrupted`].
    pub async fn execute(
        &self,
        view: &dyn ClusterView,
        settings: &Settings,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let combinations = settings.host_network_combinations();
        let mut failures = DialFailures::default();

        if settings.test_pods {
            let pairs = pod_pairs(view);
            for &combination in &combinations {
                let report = self
                    .run_pass(&pairs, PathKind::PodIp, Some(combination), cancel)
                    .await?;
                failures.extend(report.failures);
            }
        }

        if settings.test_services {
            let pairs = service_pairs(view);
            for &combination in &combinations {
                let report = self
                    .run_pass(&pairs, PathKind::ClusterIp, Some(combination), cancel)
                    .await?;
                failures.extend(report.failures);
            }
        }

        if settings.test_service_name {
            let pairs = service_name_pairs(view);
            let report = self
                .run_pass(&pairs, PathKind::ServiceName, None, cancel)
                .await?;
            failures.extend(report.failures);
        }

        if settings.test_external_ips {
            let pairs = service_pairs(view);
            for &combination in &combinations {
                let report = self
                    .run_pass(&pairs, PathKind::ExternalIp, Some(combination), cancel)
                    .await?;
                failures.extend(report.failures);
            }
        }

        failures.into_result()
    }

    /// Run one pass over `pairs`
    ///
    /// `host_network` is the `(source, destination)` combination the pass
    /// dials; `None` dials every pair. Returns [`Error::Interrupted`] when the
    /// token fired at any point during the pass.
    pub async fn run_pass(
        &self,
        pairs: &[Pair],
        path: PathKind,
        host_network: Option<(bool, bool)>,
        cancel: &CancellationToken,
    ) -> Result<PassReport> {
        let title = pass_title(path, host_network);
        self.sink.pass_started(&title);
        info!(pass = %title, candidates = pairs.len(), workers = self.workers, "starting pass");

        let results: Vec<Dispatch> = stream::iter(pairs.to_vec())
            .map(|pair| {
                let this = self.clone();
                let cancel = cancel.clone();
                async move { this.dispatch(&pair, path, host_network, &cancel).await }
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        if cancel.is_cancelled() || results.iter().any(|r| matches!(r, Dispatch::Interrupted)) {
            info!(pass = %title, "pass interrupted");
            return Err(Error::Interrupted);
        }

        let mut report = PassReport::default();
        for result in results {
            if let Dispatch::Dialed(outcome) = result {
                report.dispatched += 1;
                report.failures.push(outcome);
            }
        }
        info!(
            pass = %title,
            dispatched = report.dispatched,
            failed = report.failures.len(),
            "pass finished"
        );
        Ok(report)
    }

    async fn dispatch(
        &self,
        pair: &Pair,
        path: PathKind,
        host_network: Option<(bool, bool)>,
        cancel: &CancellationToken,
    ) -> Dispatch {
        if cancel.is_cancelled() {
            return Dispatch::Interrupted;
        }

        if let Some((source_hn, target_hn)) = host_network {
            if pod_host_network(&pair.source) != source_hn {
                return Dispatch::Skipped;
            }
            match target_host_network(&pair.target) {
                Some(hn) if hn == target_hn => {}
                Some(_) => return Dispatch::Skipped,
                None => {
                    debug!(source = %pair.source.name_any(), "skipping target without a valid host network label");
                    return Dispatch::Skipped;
                }
            }
        }

        let outcome = match (&pair.target, path) {
            (Target::Pod(target), _) => self.dialer.dial_pod_ip(&pair.source, target).await,
            (Target::Service(svc), PathKind::ExternalIp) => {
                self.dialer.dial_external_ip(&pair.source, svc).await
            }
            (Target::Service(svc), PathKind::ServiceName) => {
                self.dialer.dial_service_name(&pair.source, svc).await
            }
            (Target::Service(svc), _) => self.dialer.dial_cluster_ip(&pair.source, svc).await,
        };
        self.sink.record(&outcome);
        Dispatch::Dialed(outcome)
    }
}

/// Every ordered pod pair, self-pairs included
pub fn pod_pairs(view: &dyn ClusterView) -> Vec<Pair> {
    let pods = sorted_pods(view);
    pods.iter()
        .flat_map(|source| {
            pods.iter().map(move |target| Pair {
                source: source.clone(),
                target: Target::Pod(target.clone()),
            })
        })
        .collect()
}

/// Every (pod, service) pair
pub fn service_pairs(view: &dyn ClusterView) -> Vec<Pair> {
    let pods = sorted_pods(view);
    let services = sorted_services(view);
    services
        .iter()
        .flat_map(|service| {
            pods.iter().map(move |pod| Pair {
                source: pod.clone(),
                target: Target::Service(service.clone()),
            })
        })
        .collect()
}

/// Each non-host-network pod paired with the first service by name
pub fn service_name_pairs(view: &dyn ClusterView) -> Vec<Pair> {
    let Some(service) = sorted_services(view).into_iter().next() else {
        return Vec::new();
    };
    sorted_pods(view)
        .into_iter()
        .filter(|pod| !pod_host_network(pod))
        .map(|pod| Pair {
            source: pod,
            target: Target::Service(service.clone()),
        })
        .collect()
}

fn sorted_pods(view: &dyn ClusterView) -> Vec<Arc<Pod>> {
    let mut pods = view.pods();
    pods.sort_by_key(|p| p.name_any());
    pods
}

fn sorted_services(view: &dyn ClusterView) -> Vec<Arc<Service>> {
    let mut services = view.services();
    services.sort_by_key(|s| s.name_any());
    services
}

fn pod_host_network(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.host_network)
        .unwrap_or(false)
}

/// Host-network flag of a target; `None` when a service label is missing or malformed
fn target_host_network(target: &Target) -> Option<bool> {
    match target {
        Target::Pod(pod) => Some(pod_host_network(pod)),
        Target::Service(svc) => svc
            .labels()
            .get(LABEL_HOST_NETWORK)
            .and_then(|value| parse_bool(value)),
    }
}

/// Parse the boolean spellings accepted in the `hostNetwork` label
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Console header for a pass
pub fn pass_title(path: PathKind, host_network: Option<(bool, bool)>) -> String {
    let side = |hn: bool| if hn { "Pod (hostNetwork)" } else { "Pod" };
    match (path, host_network) {
        (PathKind::ServiceName, _) | (_, None) => "Pod --> Service Name --> Pod".to_string(),
        (PathKind::PodIp, Some((s, t))) => format!("{} --> {}", side(s), side(t)),
        (PathKind::ClusterIp, Some((s, t))) => format!("{} --> ClusterIP --> {}", side(s), side(t)),
        (PathKind::ExternalIp, Some((s, t))) => {
            format!("{} --> ExternalIP --> {}", side(s), side(t))
        }
    }
}
