//! Cluster State Observer
//!
//! A watch-refreshed, eventually-consistent local view of nodes (cluster-wide)
//! and of pods, services and endpoints in the probe namespace. Every read in
//! the lifecycle manager and the matrix executor goes through this cache.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Node, Pod, Service};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Read-only view over the cached cluster state
pub trait ClusterView: Send + Sync {
    /// All nodes in the cluster
    fn nodes(&self) -> Vec<Arc<Node>>;

    /// Pods in the probe namespace
    fn pods(&self) -> Vec<Arc<Pod>>;

    /// Services in the probe namespace
    fn services(&self) -> Vec<Arc<Service>>;

    /// Endpoints object for the named service, if one has been observed yet
    fn endpoints(&self, service: &str) -> Option<Arc<Endpoints>>;
}

/// Reflector-backed [`ClusterView`]
///
/// Each resource type is fed by its own background watch task. The tasks stop
/// when the cancellation token passed to [`ReflectorView::start`] fires.
#[derive(Clone)]
pub struct ReflectorView {
    namespace: String,
    nodes: Store<Node>,
    pods: Store<Pod>,
    services: Store<Service>,
    endpoints: Store<Endpoints>,
}

impl ReflectorView {
    /// Start the watches and block until every store has completed its
    /// initial list (the sync barrier).
    ///
    /// Returns [`Error::Interrupted`] if `cancel` fires before the caches sync.
    pub async fn start(client: Client, namespace: &str, cancel: &CancellationToken) -> Result<Self> {
        info!(namespace = %namespace, "starting cluster state watches");

        let view = Self {
            namespace: namespace.to_string(),
            nodes: spawn_reflector(Api::all(client.clone()), "nodes", cancel.clone()),
            pods: spawn_reflector(Api::namespaced(client.clone(), namespace), "pods", cancel.clone()),
            services: spawn_reflector(
                Api::namespaced(client.clone(), namespace),
                "services",
                cancel.clone(),
            ),
            endpoints: spawn_reflector(Api::namespaced(client, namespace), "endpoints", cancel.clone()),
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Interrupted),
            res = view.wait_until_synced() => res.map(|()| view),
        }
    }

    async fn wait_until_synced(&self) -> Result<()> {
        let stopped = |kind: &str| Error::internal(format!("{} watch stopped before syncing", kind));

        self.nodes.wait_until_ready().await.map_err(|_| stopped("node"))?;
        self.pods.wait_until_ready().await.map_err(|_| stopped("pod"))?;
        self.services.wait_until_ready().await.map_err(|_| stopped("service"))?;
        self.endpoints.wait_until_ready().await.map_err(|_| stopped("endpoints"))?;

        debug!(namespace = %self.namespace, "caches synced");
        Ok(())
    }
}

impl ClusterView for ReflectorView {
    fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.state()
    }

    fn pods(&self) -> Vec<Arc<Pod>> {
        self.pods.state()
    }

    fn services(&self) -> Vec<Arc<Service>> {
        self.services.state()
    }

    fn endpoints(&self, service: &str) -> Option<Arc<Endpoints>> {
        self.endpoints
            .get(&ObjectRef::new(service).within(&self.namespace))
    }
}

/// Spawn a reflector for `api` and return its reader half
fn spawn_reflector<K>(api: Api<K>, kind: &'static str, cancel: CancellationToken) -> Store<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector::reflector(
        writer,
        watcher::watcher(api, watcher::Config::default()).default_backoff(),
    );

    tokio::spawn(async move {
        let mut stream = Box::pin(stream);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(kind, "watch stopped");
                    break;
                }
                event = stream.next() => match event {
                    Some(Ok(_)) => {}
                    Some(Err(e)) => warn!(kind, error = %e, "watch error"),
                    None => break,
                }
            }
        }
    });

    reader
}

/// Number of ready backend addresses across all subsets of an Endpoints object
pub fn ready_addresses(endpoints: &Endpoints) -> usize {
    endpoints
        .subsets
        .iter()
        .flatten()
        .map(|subset| subset.addresses.as_ref().map_or(0, Vec::len))
        .sum()
}
