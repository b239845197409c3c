//! netcheck - in-cluster network reachability checks
//!
//! netcheck provisions disposable probe pods on every eligible node, then dials
//! every relevant network path between them and reports per-path success or
//! failure. A run always ends by deleting its probe namespace.
//!
//! # Architecture
//!
//! One run is:
//! - provisioning (namespace, probe pods, probe services) by the lifecycle manager
//! - matrix passes over pod IPs, cluster IPs, service names and external IPs
//! - teardown of the namespace
//!
//! all under a supervision tree that guarantees teardown on every exit path.
//!
//! # Modules
//!
//! - [`allocator`] - External IP pool derived from a CIDR
//! - [`nodes`] - Node eligibility predicate and node-name filter
//! - [`client`] - Cluster API client (create/delete primitives)
//! - [`cache`] - Watch-backed cluster state observer
//! - [`exec`] - Remote command execution inside probe pods
//! - [`dial`] - The dial primitive
//! - [`outcome`] - Test outcomes and result sinks
//! - [`metrics`] - OpenTelemetry counters per path kind
//! - [`poll`] - Cancellable fixed-interval polling
//! - [`lifecycle`] - Probe topology provisioning and teardown
//! - [`matrix`] - Connectivity matrix executor
//! - [`supervisor`] - Supervision / cancellation tree
//! - [`detective`] - One end-to-end run
//! - [`trigger`] - Periodic re-runs with skip-if-running
//! - [`config`] - Command-line / environment configuration
//! - [`telemetry`] - Logging and metric export setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod allocator;
pub mod cache;
pub mod client;
pub mod config;
pub mod detective;
pub mod dial;
pub mod error;
pub mod exec;
pub mod lifecycle;
pub mod matrix;
pub mod metrics;
pub mod nodes;
pub mod outcome;
pub mod poll;
pub mod supervisor;
pub mod telemetry;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Probe Constants
// =============================================================================
// Probe pods serve HTTP on the pod port; probe services forward the service
// port to it. Destination identity of a service is carried in its labels.

/// Port probe pods serve HTTP on
pub const POD_HTTP_PORT: i32 = 9376;

/// Port probe services expose
pub const SERVICE_HTTP_PORT: i32 = 9377;

/// Container name in probe pods; dials are executed in it
pub const PROBE_CONTAINER: &str = "server";

/// Label with the node a probe pod runs on
pub const LABEL_NODE_NAME: &str = "nodeName";

/// Label with the probe pod's host-network flag ("true"/"false")
pub const LABEL_HOST_NETWORK: &str = "hostNetwork";

/// Service label with the name of the pod behind it
pub const LABEL_POD_NAME: &str = "podName";

/// Service label with the IP of the pod behind it
pub const LABEL_POD_IP: &str = "podIP";
