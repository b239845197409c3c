//! Cancellable fixed-interval polling
//!
//! Readiness waits check their condition immediately, then once per interval,
//! until the condition holds or the cancellation token fires. There is no
//! separate timeout and no backoff: the run deadline is folded into the token.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::{Error, Result};

/// Default interval between readiness checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Poll `check` every `interval` until it returns `Ok(true)`.
///
/// An error from `check` ends polling and is returned as-is. Cancellation is
/// observed before every check and during every sleep, and yields
/// [`Error::Interrupted`].
pub async fn poll_until_cancelled<F, Fut>(
    interval: Duration,
    cancel: &CancellationToken,
    what: &str,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }

        if check().await? {
            return Ok(());
        }
        trace!(what, "condition not yet met");

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Interrupted),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
