//! Resource lifecycle manager
//!
//! Brings the probe topology into existence and guarantees its removal:
//!
//! 1. create a uniquely named namespace
//! 2. wait for the namespace's `default` service account
//! 3. select the eligible nodes
//! 4. create one probe pod per node, plus a host-network one when enabled
//! 5. wait until every probe pod is running
//! 6. create one probe service per pod (optionally bound to an external IP)
//! 7. wait until every probe service has a ready endpoint
//!
//! Each step fails fast. [`Lifecycle::teardown`] deletes the namespace, which
//! cascades to everything created in it.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Node, Pod, PodSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::allocator::ExternalIpPool;
use crate::cache::{ready_addresses, ClusterView};
use crate::client::ClusterClient;
use crate::config::Settings;
use crate::nodes::eligible_nodes;
use crate::poll::poll_until_cancelled;
use crate::{
    Error, Result, LABEL_HOST_NETWORK, LABEL_NODE_NAME, LABEL_POD_IP, LABEL_POD_NAME,
    POD_HTTP_PORT, PROBE_CONTAINER, SERVICE_HTTP_PORT,
};

/// Prefix of the generated probe namespace name
pub const NAMESPACE_PREFIX: &str = "netcheck-";
/// Prefix of generated probe pod names
pub const POD_PREFIX: &str = "server-";
/// Prefix of generated probe service names
pub const SERVICE_PREFIX: &str = "clusterip-";
/// Service account pods in the namespace depend on
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";
/// Grace period for probe pods on namespace deletion
pub const TERMINATION_GRACE_SECS: i64 = 2;

const PHASE_RUNNING: &str = "Running";
const PHASE_FAILED: &str = "Failed";

/// The provisioned probe topology
#[derive(Clone)]
pub struct Topology {
    /// Name of the probe namespace
    pub namespace: String,
    /// Synced view over nodes and the namespace's resources
    pub view: Arc<dyn ClusterView>,
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// Provisions and tears down the probe topology of one run
pub struct Lifecycle {
    client: Arc<dyn ClusterClient>,
    settings: Arc<Settings>,
    namespace: Mutex<Option<String>>,
}

impl Lifecycle {
    /// Create a lifecycle manager; nothing is touched until [`Lifecycle::setup`]
    pub fn new(client: Arc<dyn ClusterClient>, settings: Arc<Settings>) -> Self {
        Self {
            client,
            settings,
            namespace: Mutex::new(None),
        }
    }

    /// Name of the probe namespace, once it has been created
    pub fn namespace(&self) -> Option<String> {
        self.namespace.lock().clone()
    }

    /// Run setup steps 1 to 7 and return the ready topology
    pub async fn setup(&self, cancel: &CancellationToken) -> Result<Topology> {
        if cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }
        let namespace = self.create_namespace().await?;

        let view = self
            .client
            .observe(&namespace, cancel)
            .await
            .map_err(|e| setup_error("observe", e))?;

        self.wait_for_service_account(&namespace, cancel).await?;

        let nodes = eligible_nodes(&view.nodes(), &self.settings.node_filter);
        if nodes.is_empty() {
            return Err(Error::setup(
                "select-nodes",
                format!("no eligible nodes match '{}'", self.settings.node_filter.as_str()),
            ));
        }
        info!(count = nodes.len(), "selected eligible nodes");

        let expected = self.create_pods(&namespace, &nodes, cancel).await?;
        self.wait_for_pods_running(view.as_ref(), expected, cancel)
            .await?;

        if self.settings.needs_services() {
            let pool = self.settings.external_ip_pool();
            let services = self
                .create_services(&namespace, view.as_ref(), pool.as_ref(), cancel)
                .await?;
            self.wait_for_endpoints(view.as_ref(), &services, cancel)
                .await?;
        }

        Ok(Topology { namespace, view })
    }

    /// Create the probe namespace and record it for teardown
    async fn create_namespace(&self) -> Result<String> {
        info!("creating namespace");
        let name = self
            .client
            .create_namespace(NAMESPACE_PREFIX)
            .await
            .map_err(|e| setup_error("create-namespace", e))?;

        *self.namespace.lock() = Some(name.clone());
        info!(namespace = %name, "created namespace");
        Ok(name)
    }

    async fn wait_for_service_account(
        &self,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!("waiting for service account");
        poll_until_cancelled(
            self.settings.poll_interval,
            cancel,
            "service account",
            || async {
                self.client
                    .service_account_exists(namespace, DEFAULT_SERVICE_ACCOUNT)
                    .await
                    .map_err(|e| setup_error("wait-for-service-account", e))
            },
        )
        .await?;
        debug!(namespace = %namespace, account = DEFAULT_SERVICE_ACCOUNT, "service account available");
        Ok(())
    }

    /// Create the probe pods and return how many were created
    async fn create_pods(
        &self,
        namespace: &str,
        nodes: &[Arc<Node>],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        info!("creating pods");
        let mut created = 0;
        for node in nodes {
            let node_name = node.name_any();
            for &host_network in host_network_variants(self.settings.host_network) {
                if cancel.is_cancelled() {
                    return Err(Error::Interrupted);
                }
                let spec = probe_pod_spec(&node_name, host_network, &self.settings.image);
                let pod = self
                    .client
                    .create_pod(namespace, &spec)
                    .await
                    .map_err(|e| {
                        Error::setup(
                            "create-pods",
                            format!("failed to create probe pod on {}: {}", node_name, e),
                        )
                    })?;
                debug!(pod = %pod.name_any(), node = %node_name, host_network, "created pod");
                created += 1;
            }
        }
        Ok(created)
    }

    async fn wait_for_pods_running(
        &self,
        view: &dyn ClusterView,
        expected: usize,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(expected, "waiting for running pods");
        poll_until_cancelled(self.settings.poll_interval, cancel, "pods running", || async {
            let mut running = 0;
            for pod in view.pods() {
                let status = pod.status.as_ref();
                match status.and_then(|s| s.phase.as_deref()) {
                    Some(PHASE_RUNNING) => running += 1,
                    Some(PHASE_FAILED) => {
                        let reason = status
                            .and_then(|s| s.reason.clone().or_else(|| s.message.clone()))
                            .unwrap_or_else(|| "unknown reason".to_string());
                        return Err(Error::setup(
                            "wait-for-pods",
                            format!("probe pod {} failed: {}", pod.name_any(), reason),
                        ));
                    }
                    _ => {}
                }
            }
            debug!(running, expected, "pods running");
            Ok(running == expected)
        })
        .await
    }

    /// Create one service per probe pod and return the service names
    async fn create_services(
        &self,
        namespace: &str,
        view: &dyn ClusterView,
        pool: Option<&ExternalIpPool>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        info!("creating services");
        let mut pods = view.pods();
        pods.sort_by_key(|p| p.name_any());

        let mut names = Vec::with_capacity(pods.len());
        for pod in pods {
            if cancel.is_cancelled() {
                return Err(Error::Interrupted);
            }
            let external_ip = match pool {
                Some(pool) => Some(pool.allocate()?),
                None => None,
            };
            let spec = probe_service_spec(&pod, external_ip);
            let service = self
                .client
                .create_service(namespace, &spec)
                .await
                .map_err(|e| {
                    Error::setup(
                        "create-services",
                        format!("failed to create service for {}: {}", pod.name_any(), e),
                    )
                })?;
            debug!(
                service = %service.name_any(),
                pod = %pod.name_any(),
                external_ip = ?external_ip,
                "created service"
            );
            names.push(service.name_any());
        }
        Ok(names)
    }

    async fn wait_for_endpoints(
        &self,
        view: &dyn ClusterView,
        services: &[String],
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(expected = services.len(), "waiting for service endpoints");
        poll_until_cancelled(
            self.settings.poll_interval,
            cancel,
            "service endpoints",
            || async {
                let ready = services
                    .iter()
                    .filter(|name| {
                        view.endpoints(name)
                            .is_some_and(|ep| ready_addresses(&ep) > 0)
                    })
                    .count();
                debug!(ready, expected = services.len(), "services ready");
                Ok(ready == services.len())
            },
        )
        .await
    }

    /// Delete the probe namespace, if one was created
    ///
    /// Idempotent: the recorded namespace is consumed, so later calls are
    /// no-ops. Does not observe cancellation.
    pub async fn teardown(&self) -> Result<()> {
        let Some(namespace) = self.namespace.lock().take() else {
            debug!("no namespace to clean up");
            return Ok(());
        };

        info!(namespace = %namespace, "cleaning up");
        self.client.delete_namespace(&namespace).await?;
        info!(namespace = %namespace, "deleted namespace");
        Ok(())
    }
}

fn setup_error(step: &str, err: Error) -> Error {
    match err {
        Error::Interrupted => Error::Interrupted,
        other => Error::setup(step, other.to_string()),
    }
}

fn host_network_variants(host_network: bool) -> &'static [bool] {
    if host_network {
        &[false, true]
    } else {
        &[false]
    }
}

/// Probe pod pinned to `node`
pub fn probe_pod_spec(node: &str, host_network: bool, image: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            generate_name: Some(POD_PREFIX.to_string()),
            labels: Some(BTreeMap::from([
                (LABEL_NODE_NAME.to_string(), node.to_string()),
                (LABEL_HOST_NETWORK.to_string(), host_network.to_string()),
            ])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: PROBE_CONTAINER.to_string(),
                image: Some(image.to_string()),
                ports: Some(vec![ContainerPort {
                    container_port: POD_HTTP_PORT,
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            node_name: Some(node.to_string()),
            host_network: Some(host_network),
            termination_grace_period_seconds: Some(TERMINATION_GRACE_SECS),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Cluster IP service fronting exactly one probe pod
///
/// The destination identity (pod name, pod IP, node, host-network flag) is
/// carried in labels; the selector picks the pod by node and host-network flag.
pub fn probe_service_spec(pod: &Pod, external_ip: Option<IpAddr>) -> Service {
    let node = pod
        .spec
        .as_ref()
        .and_then(|s| s.node_name.clone())
        .unwrap_or_default();
    let host_network = pod
        .spec
        .as_ref()
        .and_then(|s| s.host_network)
        .unwrap_or(false)
        .to_string();
    let pod_ip = pod
        .status
        .as_ref()
        .and_then(|s| s.pod_ip.clone())
        .unwrap_or_default();

    Service {
        metadata: ObjectMeta {
            generate_name: Some(SERVICE_PREFIX.to_string()),
            labels: Some(BTreeMap::from([
                (LABEL_POD_NAME.to_string(), pod.name_any()),
                (LABEL_POD_IP.to_string(), pod_ip),
                (LABEL_NODE_NAME.to_string(), node.clone()),
                (LABEL_HOST_NETWORK.to_string(), host_network.clone()),
            ])),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                port: SERVICE_HTTP_PORT,
                target_port: Some(IntOrString::Int(POD_HTTP_PORT)),
                ..Default::default()
            }]),
            selector: Some(BTreeMap::from([
                (LABEL_NODE_NAME.to_string(), node),
                (LABEL_HOST_NETWORK.to_string(), host_network),
            ])),
            external_ips: external_ip.map(|ip| vec![ip.to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
