//! One end-to-end connectivity run
//!
//! Wires the lifecycle manager and the matrix executor together under a
//! [`Supervisor`]: setup then execute in the inner unit, namespace teardown in
//! the outer unit.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::ClusterClient;
use crate::config::Settings;
use crate::dial::Dialer;
use crate::exec::RemoteExecutor;
use crate::lifecycle::Lifecycle;
use crate::matrix::MatrixExecutor;
use crate::outcome::OutcomeSink;
use crate::supervisor::Supervisor;
use crate::Result;

/// A running connectivity check
pub struct Detective {
    supervisor: Supervisor,
    lifecycle: Arc<Lifecycle>,
}

impl Detective {
    /// Start a run in the background
    pub fn start(
        client: Arc<dyn ClusterClient>,
        executor: Arc<dyn RemoteExecutor>,
        sink: Arc<dyn OutcomeSink>,
        settings: Arc<Settings>,
    ) -> Self {
        let lifecycle = Arc::new(Lifecycle::new(client, settings.clone()));
        let deadline = settings.run_timeout;

        let run_lifecycle = lifecycle.clone();
        let work = move |cancel: CancellationToken| async move {
            let topology = run_lifecycle.setup(&cancel).await?;
            info!(namespace = %topology.namespace, "probe topology ready");

            let dialer = Dialer::new(executor, topology.namespace.clone());
            let matrix = MatrixExecutor::new(dialer, sink, settings.workers);
            matrix
                .execute(topology.view.as_ref(), &settings, &cancel)
                .await
        };

        let cleanup_lifecycle = lifecycle.clone();
        let teardown = move || async move { cleanup_lifecycle.teardown().await };

        Self {
            supervisor: Supervisor::start(work, teardown, deadline),
            lifecycle,
        }
    }

    /// Cancel the run; the namespace is still deleted
    pub fn kill(&self) {
        self.supervisor.kill();
    }

    /// Token that cancels the run when triggered
    pub fn cancel_token(&self) -> CancellationToken {
        self.supervisor.cancel_token()
    }

    /// True until the run and its teardown have finished
    pub fn is_alive(&self) -> bool {
        self.supervisor.is_alive()
    }

    /// Probe namespace of this run, while it exists
    pub fn namespace(&self) -> Option<String> {
        self.lifecycle.namespace()
    }

    /// Wait for the run and its teardown; returns the combined result
    pub async fn wait(self) -> Result<()> {
        self.supervisor.wait().await
    }

    /// Like [`Detective::wait`], but kill the run when `shutdown` fires
    pub async fn wait_or_kill(self, shutdown: &CancellationToken) -> Result<()> {
        let run = self.cancel_token();
        let wait = self.wait();
        tokio::pin!(wait);

        tokio::select! {
            result = &mut wait => result,
            _ = shutdown.cancelled() => {
                info!("shutdown requested, cancelling run");
                run.cancel();
                wait.await
            }
        }
    }
}
