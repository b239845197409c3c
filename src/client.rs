//! Cluster API client
//!
//! The lifecycle manager only needs a handful of create/delete primitives plus
//! a cached view for reads. [`ClusterClient`] is that surface; production code
//! uses [`KubeClusterClient`], tests use the generated mock or the in-memory
//! fake cluster.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service, ServiceAccount};
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::cache::{ClusterView, ReflectorView};
use crate::{Error, Result};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Cluster operations used by the lifecycle manager
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create a namespace with a server-generated name and return that name
    async fn create_namespace(&self, generate_name: &str) -> Result<String>;

    /// Delete a namespace, cascading to everything in it
    ///
    /// A namespace that no longer exists is not an error.
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// Check whether a service account exists in a namespace
    async fn service_account_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Create a pod and return the created object
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod>;

    /// Create a service and return the created object
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service>;

    /// Start observing nodes and the namespace's pods, services and endpoints
    ///
    /// Resolves once the cached view has synced. The view stops refreshing
    /// when `cancel` fires.
    async fn observe(
        &self,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ClusterView>>;
}

/// [`ClusterClient`] backed by a real `kube::Client`
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_namespace(&self, generate_name: &str) -> Result<String> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                generate_name: Some(generate_name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let created = api.create(&PostParams::default(), &ns).await?;
        let name = created.name_any();
        debug!(namespace = %name, "namespace created");
        Ok(name)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => {
                debug!(namespace = %name, "namespace deletion requested");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(namespace = %name, "namespace already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn service_account_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), pod).await?)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), service).await?)
    }

    async fn observe(
        &self,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ClusterView>> {
        let view = ReflectorView::start(self.client.clone(), namespace, cancel).await?;
        Ok(Arc::new(view))
    }
}

/// Create a kube client from an optional kubeconfig path with default timeouts
///
/// Without a path the configuration is inferred (in-cluster service account,
/// then `KUBECONFIG` / `~/.kube/config`).
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| Error::config(format!("failed to read kubeconfig: {}", e)))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer kube config: {}", e)))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    info!(host = %config.cluster_url, "connecting to cluster");
    Client::try_from(config).map_err(|e| Error::internal(format!("failed to create client: {}", e)))
}
