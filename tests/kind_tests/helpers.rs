//! Shared helpers for the kind integration tests

use std::sync::{Arc, Once};
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::Api;
use kube::Client;

use netcheck::config::{Options, Settings};

static CRYPTO: Once = Once::new();

/// Client for the cluster of the current kubeconfig context
pub async fn test_client() -> Client {
    CRYPTO.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
    netcheck::client::create_client(None)
        .await
        .expect("a reachable cluster is required for kind tests")
}

/// Settings for a quick run: pods and cluster IPs, no host-network pods
pub fn quick_settings() -> Arc<Settings> {
    let options = Options {
        host_network: false,
        run_timeout_secs: 300,
        ..Options::default()
    };
    Arc::new(options.validate().expect("default options are valid"))
}

/// Wait until `name` is gone, or panic after `timeout`
pub async fn assert_namespace_deleted(client: &Client, name: &str, timeout: Duration) {
    let api: Api<Namespace> = Api::all(client.clone());
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match api.get_opt(name).await.expect("namespace lookup failed") {
            None => return,
            // terminating is good enough; the delete was issued
            Some(ns) if ns.metadata.deletion_timestamp.is_some() => return,
            Some(_) => {}
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "namespace {} still present",
            name
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
