//! Supervision / cancellation tree
//!
//! Two nested units. The inner unit runs the work with a child cancellation
//! token. The outer unit waits for the inner one to finish however it ends
//! (success, error, panic or cancellation), runs teardown exactly once, and
//! resolves with the combined result: the work error if there was one (with
//! any teardown failure attached), otherwise the teardown result.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Handle on a supervised run
pub struct Supervisor {
    outer: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl Supervisor {
    /// Spawn `work` under supervision and arrange for `teardown` to follow it.
    ///
    /// When `deadline` is set, the outer token is cancelled once it elapses.
    pub fn start<W, WF, T, TF>(work: W, teardown: T, deadline: Option<Duration>) -> Self
    where
        W: FnOnce(CancellationToken) -> WF,
        WF: Future<Output = Result<()>> + Send + 'static,
        T: FnOnce() -> TF + Send + 'static,
        TF: Future<Output = Result<()>> + Send + 'static,
    {
        let outer = CancellationToken::new();
        let inner = outer.child_token();
        let inner_handle = tokio::spawn(work(inner.clone()));

        let watchdog = deadline.map(|deadline| {
            let token = outer.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(deadline) => {
                        warn!(deadline_secs = deadline.as_secs(), "run deadline reached, cancelling");
                        token.cancel();
                    }
                }
            })
        });

        let handle = tokio::spawn(async move {
            let run = match inner_handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::internal(format!("run task failed: {}", e))),
            };
            // stop background watches tied to the run before cleaning up
            inner.cancel();

            debug!(ok = run.is_ok(), "run finished, tearing down");
            let cleanup = teardown().await;
            if let Some(watchdog) = watchdog {
                watchdog.abort();
            }
            combine(run, cleanup)
        });

        Self { outer, handle }
    }

    /// Cancel the run; teardown still happens. Safe to call any number of times.
    pub fn kill(&self) {
        self.outer.cancel();
    }

    /// Token that cancels the whole run when triggered
    pub fn cancel_token(&self) -> CancellationToken {
        self.outer.clone()
    }

    /// True until both the work and teardown have finished
    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Wait for the work and teardown to finish and return the combined result
    pub async fn wait(self) -> Result<()> {
        self.handle
            .await
            .map_err(|e| Error::internal(format!("supervisor task failed: {}", e)))?
    }
}

fn combine(run: Result<()>, cleanup: Result<()>) -> Result<()> {
    match (run, cleanup) {
        (Ok(()), cleanup) => cleanup,
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup)) => Err(e.with_cleanup_failure(cleanup)),
    }
}
