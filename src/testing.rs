//! Test fixtures: resource builders, an in-memory cluster and a recording sink

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointSubset, Endpoints, Node, NodeCondition, NodeSpec, NodeStatus, Pod,
    PodStatus, Service,
};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cache::ClusterView;
use crate::client::ClusterClient;
use crate::lifecycle::{probe_pod_spec, probe_service_spec};
use crate::outcome::{OutcomeSink, TestOutcome};
use crate::{Error, Result, LABEL_POD_IP};

/// A node with a single `Ready` condition
pub fn node(name: &str, ready: bool) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(NodeSpec::default()),
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// A running probe pod on `node_name` with the given IP
pub fn probe_pod(name: &str, node_name: &str, host_network: bool, ip: &str) -> Pod {
    let mut pod = probe_pod_spec(node_name, host_network, "test-image");
    pod.metadata.name = Some(name.to_string());
    pod.metadata.generate_name = None;
    pod.status = Some(PodStatus {
        phase: Some("Running".to_string()),
        pod_ip: Some(ip.to_string()),
        ..Default::default()
    });
    pod
}

/// A probe service for `pod` with an assigned cluster IP
pub fn probe_service(name: &str, pod: &Pod, cluster_ip: &str, external_ip: Option<&str>) -> Service {
    let external_ip = external_ip.and_then(|ip| ip.parse::<IpAddr>().ok());
    let mut service = probe_service_spec(pod, external_ip);
    service.metadata.name = Some(name.to_string());
    service.metadata.generate_name = None;
    if let Some(spec) = service.spec.as_mut() {
        spec.cluster_ip = Some(cluster_ip.to_string());
    }
    service
}

/// Sink that keeps every outcome it receives
#[derive(Default)]
pub struct RecordingSink {
    outcomes: Mutex<Vec<TestOutcome>>,
    passes: Mutex<Vec<String>>,
}

impl RecordingSink {
    /// Outcomes recorded so far
    pub fn outcomes(&self) -> Vec<TestOutcome> {
        self.outcomes.lock().clone()
    }

    /// Headers of the passes started so far
    pub fn passes(&self) -> Vec<String> {
        self.passes.lock().clone()
    }
}

impl OutcomeSink for RecordingSink {
    fn record(&self, outcome: &TestOutcome) {
        self.outcomes.lock().push(outcome.clone());
    }

    fn pass_started(&self, title: &str) {
        self.passes.lock().push(title.to_string());
    }
}

/// Fixed pods and services, for executing matrix passes directly
#[derive(Default)]
pub struct StaticView {
    /// Pods returned by the view
    pub pods: Vec<Pod>,
    /// Services returned by the view
    pub services: Vec<Service>,
}

impl ClusterView for StaticView {
    fn nodes(&self) -> Vec<Arc<Node>> {
        Vec::new()
    }

    fn pods(&self) -> Vec<Arc<Pod>> {
        self.pods.iter().cloned().map(Arc::new).collect()
    }

    fn services(&self) -> Vec<Arc<Service>> {
        self.services.iter().cloned().map(Arc::new).collect()
    }

    fn endpoints(&self, _service: &str) -> Option<Arc<Endpoints>> {
        None
    }
}

#[derive(Default)]
struct FakeState {
    nodes: Vec<Arc<Node>>,
    namespaces: Vec<String>,
    pods: Vec<(String, Arc<Pod>)>,
    services: Vec<(String, Arc<Service>)>,
    counter: usize,
    pod_failure: Option<String>,
    pods_pending: bool,
    delete_failure: Option<String>,
    delete_calls: usize,
}

impl FakeState {
    fn next_id(&mut self) -> usize {
        self.counter += 1;
        self.counter
    }
}

/// In-memory cluster
///
/// Created pods are immediately running with an IP (host-network pods get
/// their node's address), created services immediately get a cluster IP and
/// a ready endpoint, and deleting a namespace removes everything in it.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCluster {
    /// A cluster with the given nodes
    pub fn with_nodes(nodes: Vec<Node>) -> Self {
        let cluster = Self::default();
        cluster.state.lock().nodes = nodes.into_iter().map(Arc::new).collect();
        cluster
    }

    /// Make every pod created from now on end up `Failed` with `reason`
    pub fn fail_pods(&self, reason: &str) {
        self.state.lock().pod_failure = Some(reason.to_string());
    }

    /// Keep every pod created from now on `Pending`
    pub fn hold_pods_pending(&self) {
        self.state.lock().pods_pending = true;
    }

    /// Make namespace deletion fail with `message`
    pub fn fail_namespace_delete(&self, message: &str) {
        self.state.lock().delete_failure = Some(message.to_string());
    }

    /// Pods created so far, across namespaces that still exist
    pub fn created_pods(&self) -> Vec<Pod> {
        self.state
            .lock()
            .pods
            .iter()
            .map(|(_, p)| (**p).clone())
            .collect()
    }

    /// Services created so far, across namespaces that still exist
    pub fn created_services(&self) -> Vec<Service> {
        self.state
            .lock()
            .services
            .iter()
            .map(|(_, s)| (**s).clone())
            .collect()
    }

    /// Namespaces that have not been deleted
    pub fn live_namespaces(&self) -> Vec<String> {
        self.state.lock().namespaces.clone()
    }

    /// Number of namespace deletions requested
    pub fn delete_calls(&self) -> usize {
        self.state.lock().delete_calls
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn create_namespace(&self, generate_name: &str) -> Result<String> {
        let mut state = self.state.lock();
        let name = format!("{}{:05}", generate_name, state.next_id());
        state.namespaces.push(name.clone());
        Ok(name)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.delete_calls += 1;
        if let Some(message) = state.delete_failure.clone() {
            return Err(Error::internal(message));
        }
        state.namespaces.retain(|ns| ns != name);
        state.pods.retain(|(ns, _)| ns != name);
        state.services.retain(|(ns, _)| ns != name);
        Ok(())
    }

    async fn service_account_exists(&self, namespace: &str, _name: &str) -> Result<bool> {
        Ok(self.state.lock().namespaces.iter().any(|ns| ns == namespace))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let mut state = self.state.lock();
        let id = state.next_id();

        let mut created = pod.clone();
        let prefix = pod.metadata.generate_name.clone().unwrap_or_default();
        created.metadata.name = Some(format!("{}{:05}", prefix, id));
        created.metadata.namespace = Some(namespace.to_string());

        let spec = pod.spec.clone().unwrap_or_default();
        let host_network = spec.host_network.unwrap_or(false);
        let node_index = state
            .nodes
            .iter()
            .position(|n| Some(n.name_any()) == spec.node_name)
            .unwrap_or(0);
        let ip = if host_network {
            format!("192.168.0.{}", node_index + 1)
        } else {
            format!("10.244.{}.{}", node_index, id)
        };

        let (phase, reason) = match (&state.pod_failure, state.pods_pending) {
            (Some(reason), _) => ("Failed", Some(reason.clone())),
            (None, true) => ("Pending", None),
            (None, false) => ("Running", None),
        };
        created.status = Some(PodStatus {
            phase: Some(phase.to_string()),
            reason,
            pod_ip: (phase == "Running").then_some(ip),
            ..Default::default()
        });

        state.pods.push((namespace.to_string(), Arc::new(created.clone())));
        Ok(created)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        let mut state = self.state.lock();
        let id = state.next_id();

        let mut created = service.clone();
        let prefix = service.metadata.generate_name.clone().unwrap_or_default();
        created.metadata.name = Some(format!("{}{:05}", prefix, id));
        created.metadata.namespace = Some(namespace.to_string());
        if let Some(spec) = created.spec.as_mut() {
            spec.cluster_ip = Some(format!("10.96.0.{}", id));
        }

        state
            .services
            .push((namespace.to_string(), Arc::new(created.clone())));
        Ok(created)
    }

    async fn observe(
        &self,
        namespace: &str,
        _cancel: &CancellationToken,
    ) -> Result<Arc<dyn ClusterView>> {
        Ok(Arc::new(FakeView {
            state: self.state.clone(),
            namespace: namespace.to_string(),
        }))
    }
}

struct FakeView {
    state: Arc<Mutex<FakeState>>,
    namespace: String,
}

impl ClusterView for FakeView {
    fn nodes(&self) -> Vec<Arc<Node>> {
        self.state.lock().nodes.clone()
    }

    fn pods(&self) -> Vec<Arc<Pod>> {
        self.state
            .lock()
            .pods
            .iter()
            .filter(|(ns, _)| *ns == self.namespace)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn services(&self) -> Vec<Arc<Service>> {
        self.state
            .lock()
            .services
            .iter()
            .filter(|(ns, _)| *ns == self.namespace)
            .map(|(_, s)| s.clone())
            .collect()
    }

    fn endpoints(&self, service: &str) -> Option<Arc<Endpoints>> {
        let svc = self
            .services()
            .into_iter()
            .find(|s| s.name_any() == service)?;
        let ip = svc.labels().get(LABEL_POD_IP).cloned().unwrap_or_default();

        Some(Arc::new(Endpoints {
            metadata: ObjectMeta {
                name: Some(service.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip,
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
        }))
    }
}
