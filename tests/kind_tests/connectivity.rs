//! Integration tests for full connectivity runs
//!
//! These tests tell the story of an operator pointing netcheck at a healthy
//! cluster and reading the per-path report.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use netcheck::client::KubeClusterClient;
use netcheck::detective::Detective;
use netcheck::exec::KubeExecutor;
use netcheck::outcome::{OutcomeSink, PathKind, TestOutcome};

use super::helpers::{assert_namespace_deleted, quick_settings, test_client};

#[derive(Default)]
struct Collect(Mutex<Vec<TestOutcome>>);

impl OutcomeSink for Collect {
    fn record(&self, outcome: &TestOutcome) {
        self.0.lock().push(outcome.clone());
    }
}

/// Story: a healthy cluster reports success on every pod and cluster IP path
#[tokio::test]
#[ignore]
async fn story_healthy_cluster_passes_every_path() {
    let client = test_client().await;
    let sink = Arc::new(Collect::default());

    let detective = Detective::start(
        Arc::new(KubeClusterClient::new(client.clone())),
        Arc::new(KubeExecutor::new(client.clone())),
        sink.clone(),
        quick_settings(),
    );
    let result = detective.wait().await;

    let outcomes = sink.0.lock().clone();
    for outcome in outcomes.iter().filter(|o| !o.is_success()) {
        eprintln!("{}", outcome);
    }
    result.expect("run failed");

    let pods = outcomes.iter().filter(|o| o.path == PathKind::PodIp).count();
    let cluster_ips = outcomes
        .iter()
        .filter(|o| o.path == PathKind::ClusterIp)
        .count();
    assert!(pods > 0);
    // n pods dial n pods, n pods dial n services
    assert_eq!(pods, cluster_ips);
}

/// Story: a shutdown signal mid-run cancels dialing and deletes the namespace
#[tokio::test]
#[ignore]
async fn story_shutdown_mid_run_cleans_up() {
    let client = test_client().await;
    let detective = Detective::start(
        Arc::new(KubeClusterClient::new(client.clone())),
        Arc::new(KubeExecutor::new(client.clone())),
        Arc::new(Collect::default()),
        quick_settings(),
    );

    // wait until the namespace exists so there is something to clean up
    let mut namespace = None;
    for _ in 0..30 {
        namespace = detective.namespace();
        if namespace.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let result = detective.wait_or_kill(&shutdown).await;
    assert!(result.is_err());

    let namespace = namespace.expect("namespace was never created");
    assert_namespace_deleted(&client, &namespace, Duration::from_secs(60)).await;
}
