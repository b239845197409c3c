//! Dial primitive
//!
//! A dial runs an HTTP fetch from inside a source probe pod against a
//! destination host and port. The result is always a [`TestOutcome`]; a dial
//! never returns an error to its caller.

use std::net::Ipv6Addr;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Pod, Service};
use kube::ResourceExt;
use tracing::debug;

use crate::exec::RemoteExecutor;
use crate::outcome::{PathKind, TestOutcome};
use crate::{LABEL_NODE_NAME, LABEL_POD_IP, POD_HTTP_PORT, PROBE_CONTAINER, SERVICE_HTTP_PORT};

/// Seconds wget waits before giving up on a destination
pub const FETCH_TIMEOUT_SECS: u32 = 10;

/// Build the fetch command for `host:port`; IPv6 literals are bracketed
pub fn fetch_command(host: &str, port: i32) -> Vec<String> {
    let host = match host.parse::<Ipv6Addr>() {
        Ok(_) => format!("[{}]", host),
        Err(_) => host.to_string(),
    };
    vec![
        "wget".to_string(),
        format!("--timeout={}", FETCH_TIMEOUT_SECS),
        "-O-".to_string(),
        format!("http://{}:{}", host, port),
    ]
}

/// Runs dials from probe pods in one namespace
#[derive(Clone)]
pub struct Dialer {
    executor: Arc<dyn RemoteExecutor>,
    namespace: String,
}

impl Dialer {
    /// Create a dialer for pods in `namespace`
    pub fn new(executor: Arc<dyn RemoteExecutor>, namespace: impl Into<String>) -> Self {
        Self {
            executor,
            namespace: namespace.into(),
        }
    }

    /// Dial the destination pod's IP on the pod port
    pub async fn dial_pod_ip(&self, source: &Pod, target: &Pod) -> TestOutcome {
        let host = pod_ip(target);
        let error = self.dial(source, &host, POD_HTTP_PORT).await;
        TestOutcome {
            path: PathKind::PodIp,
            source_node: node_name(source),
            source_address: pod_ip(source),
            destination_node: node_name(target),
            destination_address: host,
            via: None,
            error,
        }
    }

    /// Dial the service's cluster IP on the service port
    pub async fn dial_cluster_ip(&self, source: &Pod, service: &Service) -> TestOutcome {
        let cluster_ip = service.spec.as_ref().and_then(|s| s.cluster_ip.clone());
        self.dial_via(source, service, PathKind::ClusterIp, cluster_ip)
            .await
    }

    /// Dial the service's first external IP on the service port
    pub async fn dial_external_ip(&self, source: &Pod, service: &Service) -> TestOutcome {
        let external_ip = service
            .spec
            .as_ref()
            .and_then(|s| s.external_ips.as_ref())
            .and_then(|ips| ips.first().cloned());
        self.dial_via(source, service, PathKind::ExternalIp, external_ip)
            .await
    }

    /// Dial the service by its DNS name on the service port
    pub async fn dial_service_name(&self, source: &Pod, service: &Service) -> TestOutcome {
        let name = Some(service.name_any());
        self.dial_via(source, service, PathKind::ServiceName, name)
            .await
    }

    async fn dial_via(
        &self,
        source: &Pod,
        service: &Service,
        path: PathKind,
        via: Option<String>,
    ) -> TestOutcome {
        let error = match via.as_deref().filter(|v| !v.is_empty()) {
            Some(host) => self.dial(source, host, service_port(service)).await,
            None => Some(format!(
                "service {} has no {} address",
                service.name_any(),
                path
            )),
        };

        TestOutcome {
            path,
            source_node: node_name(source),
            source_address: pod_ip(source),
            destination_node: label(service, LABEL_NODE_NAME),
            destination_address: label(service, LABEL_POD_IP),
            via,
            error,
        }
    }

    /// Run the fetch and return the error detail, if any
    async fn dial(&self, source: &Pod, host: &str, port: i32) -> Option<String> {
        let pod = source.name_any();
        match self
            .executor
            .exec(&self.namespace, &pod, PROBE_CONTAINER, fetch_command(host, port))
            .await
        {
            Ok(output) => {
                debug!(pod = %pod, host = %host, port, output = %output.trim(), "dial succeeded");
                None
            }
            Err(e) => {
                debug!(pod = %pod, host = %host, port, error = %e, "dial failed");
                Some(e.to_string())
            }
        }
    }
}

fn node_name(pod: &Pod) -> String {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.clone())
        .unwrap_or_default()
}

fn pod_ip(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|s| s.pod_ip.clone())
        .unwrap_or_default()
}

fn label(service: &Service, key: &str) -> String {
    service.labels().get(key).cloned().unwrap_or_default()
}

fn service_port(service: &Service) -> i32 {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.first())
        .map_or(SERVICE_HTTP_PORT, |p| p.port)
}
