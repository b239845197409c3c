//! Error types for netcheck
//!
//! Errors fall into four families with different handling:
//! - configuration errors are fatal and reported before the cluster is touched
//! - setup errors abort the run, teardown still executes
//! - dial errors are only ever surfaced through the aggregated [`DialFailures`]
//! - cancellation is reported as [`Error::Interrupted`], never as a failure

use thiserror::Error;

use crate::outcome::DialFailures;

/// Main error type for netcheck operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Invalid configuration (CIDR, node filter, worker count, ...)
    #[error("configuration error: {0}")]
    Config(String),

    /// Every address of the external CIDR has been handed out
    #[error("no more external IPs available in {cidr}")]
    PoolExhausted {
        /// The CIDR the pool was derived from
        cidr: String,
    },

    /// Provisioning of the probe topology failed
    #[error("setup failed [{step}]: {message}")]
    Setup {
        /// Lifecycle step that failed (e.g. "create-pods", "wait-for-pods")
        step: String,
        /// Description of what failed
        message: String,
    },

    /// Remote command execution inside a probe pod failed
    #[error("exec error: {0}")]
    Exec(String),

    /// One or more dials failed
    #[error("{0}")]
    Dial(DialFailures),

    /// The run was cancelled before it completed
    #[error("interrupted")]
    Interrupted,

    /// The run failed and tearing down the namespace failed as well
    #[error("{primary} (cleanup also failed: {cleanup})")]
    Teardown {
        /// The error that ended the run
        primary: Box<Error>,
        /// The error returned by namespace deletion
        cleanup: Box<Error>,
    },

    /// Internal/operational error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a pool exhaustion error for the given CIDR
    pub fn pool_exhausted(cidr: impl Into<String>) -> Self {
        Self::PoolExhausted { cidr: cidr.into() }
    }

    /// Create a setup error for the given lifecycle step
    pub fn setup(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Setup {
            step: step.into(),
            message: msg.into(),
        }
    }

    /// Create an exec error with the given message
    pub fn exec(msg: impl Into<String>) -> Self {
        Self::Exec(msg.into())
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Attach a teardown failure to a primary error without masking it
    pub fn with_cleanup_failure(self, cleanup: Error) -> Self {
        Self::Teardown {
            primary: Box::new(self),
            cleanup: Box::new(cleanup),
        }
    }

    /// Check if this is a configuration error
    ///
    /// Pool exhaustion counts as configuration: the CIDR is too small for the
    /// number of probe pods.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::PoolExhausted { .. })
    }

    /// Check if this error (or the primary error it wraps) is a cancellation
    pub fn is_interrupted(&self) -> bool {
        match self {
            Error::Interrupted => true,
            Error::Teardown { primary, .. } => primary.is_interrupted(),
            _ => false,
        }
    }

    /// Get the dial failures if this error is an aggregated dial report
    pub fn dial_failures(&self) -> Option<&DialFailures> {
        match self {
            Error::Dial(failures) => Some(failures),
            Error::Teardown { primary, .. } => primary.dial_failures(),
            _ => None,
        }
    }
}
