//! Remote command execution inside probe pods
//!
//! Runs a command in a pod container over the websocket exec subresource and
//! returns combined stdout+stderr. A command counts as successful only when
//! the API server reports a `Success` status for the session.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// Upper bound on one exec session, covering connection setup and the command
pub const EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Status string the API server reports for a command that exited 0
const STATUS_SUCCESS: &str = "Success";

/// Executes commands inside pod containers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` in `container` of `pod` and return combined stdout+stderr
    ///
    /// Non-zero exits and transport failures are returned as [`Error::Exec`].
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<String>;
}

/// [`RemoteExecutor`] using the kube websocket exec API
#[derive(Clone)]
pub struct KubeExecutor {
    client: Client,
    timeout: Duration,
}

impl KubeExecutor {
    /// Create an executor with [`EXEC_TIMEOUT`]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: EXEC_TIMEOUT,
        }
    }

    async fn run(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<String> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default()
            .container(container)
            .stdout(true)
            .stderr(true);

        let mut attached = api
            .exec(pod, command, &params)
            .await
            .map_err(|e| Error::exec(format!("failed to start exec in {}: {}", pod, e)))?;

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let status = attached.take_status();

        let (out, err) = tokio::join!(read_stream(stdout), read_stream(stderr));
        let status = match status {
            Some(status) => status.await,
            None => None,
        };

        attached
            .join()
            .await
            .map_err(|e| Error::exec(format!("exec session in {} failed: {}", pod, e)))?;

        let output = format!("{}{}", out, err);
        trace!(pod = %pod, output = %output, "exec output");

        match status {
            Some(s) if s.status.as_deref() == Some(STATUS_SUCCESS) => Ok(output),
            Some(s) => Err(Error::exec(format!(
                "command in {} failed: {} {}",
                pod,
                s.message.unwrap_or_default(),
                output.trim()
            ))),
            None => Err(Error::exec(format!("no exit status from {}", pod))),
        }
    }
}

#[async_trait]
impl RemoteExecutor for KubeExecutor {
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<String> {
        debug!(namespace = %namespace, pod = %pod, command = ?command, "exec");
        tokio::time::timeout(self.timeout, self.run(namespace, pod, container, command))
            .await
            .map_err(|_| {
                Error::exec(format!(
                    "timed out after {}s waiting for {}",
                    self.timeout.as_secs(),
                    pod
                ))
            })?
    }
}

async fn read_stream<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!(error = %e, "exec stream closed early");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
