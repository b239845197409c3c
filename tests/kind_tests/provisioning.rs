//! Integration tests for probe provisioning
//!
//! These tests tell the story of the probe topology: what a run creates on
//! the cluster before it dials anything, and that all of it goes away again.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use netcheck::client::KubeClusterClient;
use netcheck::lifecycle::Lifecycle;
use netcheck::nodes::{eligible_nodes, NodeFilter, MATCH_ALL};
use netcheck::LABEL_POD_IP;

use super::helpers::{assert_namespace_deleted, quick_settings, test_client};

/// Story: every eligible node gets a running probe pod with a service in front
#[tokio::test]
#[ignore]
async fn story_setup_provisions_one_pod_and_service_per_node() {
    let client = test_client().await;
    let lifecycle = Lifecycle::new(
        Arc::new(KubeClusterClient::new(client.clone())),
        quick_settings(),
    );

    let cancel = CancellationToken::new();
    let topology = lifecycle.setup(&cancel).await;
    let namespace = lifecycle.namespace().expect("namespace recorded");

    let outcome = topology.map(|topology| {
        let filter = NodeFilter::new(MATCH_ALL).unwrap();
        let nodes = eligible_nodes(&topology.view.nodes(), &filter);
        let pods = topology.view.pods();
        let services = topology.view.services();
        (nodes.len(), pods, services)
    });

    lifecycle.teardown().await.expect("teardown failed");
    assert_namespace_deleted(&client, &namespace, Duration::from_secs(60)).await;

    let (nodes, pods, services) = outcome.expect("setup failed");
    assert_eq!(pods.len(), nodes);
    assert_eq!(services.len(), nodes);
    for pod in &pods {
        assert!(pod.status.as_ref().and_then(|s| s.pod_ip.as_ref()).is_some());
    }
    for svc in &services {
        assert!(svc.metadata.labels.as_ref().unwrap().contains_key(LABEL_POD_IP));
    }
}

/// Story: cancelling during provisioning still removes the namespace
#[tokio::test]
#[ignore]
async fn story_cancelled_setup_is_still_torn_down() {
    let client = test_client().await;
    let lifecycle = Lifecycle::new(
        Arc::new(KubeClusterClient::new(client.clone())),
        quick_settings(),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        trigger.cancel();
    });

    let result = lifecycle.setup(&cancel).await;
    let namespace = lifecycle.namespace();
    lifecycle.teardown().await.expect("teardown failed");

    if let Some(namespace) = namespace {
        assert_namespace_deleted(&client, &namespace, Duration::from_secs(60)).await;
    }
    // a very fast cluster may finish before the cancel lands
    if let Err(e) = result {
        assert!(e.is_interrupted(), "unexpected error: {}", e);
    }
}
