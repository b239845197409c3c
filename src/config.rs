//! Run configuration
//!
//! [`Options`] is the raw command-line/environment surface. [`Options::validate`]
//! turns it into [`Settings`], rejecting anything malformed before a single
//! cluster resource is touched.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args};
use ipnet::IpNet;

use crate::allocator::{parse_cidr, ExternalIpPool};
use crate::nodes::{NodeFilter, MATCH_ALL};
use crate::poll::DEFAULT_POLL_INTERVAL;
use crate::{Error, Result};

/// Default probe image serving its hostname over HTTP on the pod port
pub const DEFAULT_TEST_IMAGE: &str = "gcr.io/google_containers/serve_hostname:1.2";

/// Default size of the dial worker pool
pub const DEFAULT_WORKERS: usize = 10;

/// Connectivity check options
#[derive(Args, Debug, Clone)]
pub struct Options {
    /// CIDR external IPs are allocated from; required with --external-ips
    #[arg(long, env = "NETCHECK_EXTERNAL_CIDR")]
    pub external_cidr: Option<String>,

    /// Regular expression node names must match to receive probe pods
    #[arg(long, env = "NETCHECK_NODE_FILTER", default_value = MATCH_ALL)]
    pub node_filter: String,

    /// Test pod to pod connectivity
    #[arg(long, env = "NETCHECK_PODS", default_value_t = true, action = ArgAction::Set)]
    pub pods: bool,

    /// Test pod to cluster IP connectivity
    #[arg(long, env = "NETCHECK_SERVICES", default_value_t = true, action = ArgAction::Set)]
    pub services: bool,

    /// Test pod to service name connectivity
    #[arg(long, env = "NETCHECK_SERVICE_NAME", default_value_t = false, action = ArgAction::Set)]
    pub service_name: bool,

    /// Test pod to external IP connectivity
    #[arg(long, env = "NETCHECK_EXTERNAL_IPS", default_value_t = false, action = ArgAction::Set)]
    pub external_ips: bool,

    /// Also create and test host-network probe pods
    #[arg(long, env = "NETCHECK_HOST_NETWORK", default_value_t = true, action = ArgAction::Set)]
    pub host_network: bool,

    /// Number of dials running in parallel
    #[arg(long, env = "NETCHECK_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Probe container image
    #[arg(long, env = "NETCHECK_TEST_IMAGE", default_value = DEFAULT_TEST_IMAGE)]
    pub test_image: String,

    /// Seconds between readiness checks while provisioning
    #[arg(long, env = "NETCHECK_POLL_INTERVAL_SECS", default_value_t = 1)]
    pub poll_interval_secs: u64,

    /// Seconds after which a run is cancelled (0 disables the deadline)
    #[arg(long, env = "NETCHECK_RUN_TIMEOUT_SECS", default_value_t = 600)]
    pub run_timeout_secs: u64,

    /// Path to a kubeconfig file
    ///
    /// When omitted the client config is inferred, which also honours a
    /// colon-separated `KUBECONFIG` list.
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            external_cidr: None,
            node_filter: MATCH_ALL.to_string(),
            pods: true,
            services: true,
            service_name: false,
            external_ips: false,
            host_network: true,
            workers: DEFAULT_WORKERS,
            test_image: DEFAULT_TEST_IMAGE.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            run_timeout_secs: 600,
            kubeconfig: None,
        }
    }
}

impl Options {
    /// Validate the options and compile them into [`Settings`]
    pub fn validate(&self) -> Result<Settings> {
        let node_filter = NodeFilter::new(&self.node_filter)?;

        let external_cidr = match (self.external_ips, self.external_cidr.as_deref()) {
            (true, None) | (true, Some("")) => {
                return Err(Error::config(
                    "--external-cidr is required when external IP testing is enabled",
                ))
            }
            (true, Some(cidr)) => Some(parse_cidr(cidr)?),
            (false, _) => None,
        };

        if self.workers == 0 {
            return Err(Error::config("--workers must be at least 1"));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::config("--poll-interval-secs must be at least 1"));
        }
        if self.test_image.trim().is_empty() {
            return Err(Error::config("--test-image must not be empty"));
        }

        Ok(Settings {
            node_filter,
            external_cidr,
            test_pods: self.pods,
            test_services: self.services,
            test_service_name: self.service_name,
            test_external_ips: self.external_ips,
            host_network: self.host_network,
            workers: self.workers,
            image: self.test_image.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            run_timeout: (self.run_timeout_secs > 0)
                .then(|| Duration::from_secs(self.run_timeout_secs)),
        })
    }
}

/// Validated run settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Compiled node-name filter
    pub node_filter: NodeFilter,
    /// CIDR external IPs are drawn from, when external IP testing is enabled
    pub external_cidr: Option<IpNet>,
    /// Run the pod to pod passes
    pub test_pods: bool,
    /// Run the pod to cluster IP passes
    pub test_services: bool,
    /// Run the service name pass
    pub test_service_name: bool,
    /// Run the pod to external IP passes
    pub test_external_ips: bool,
    /// Create host-network probe pods and run the passes involving them
    pub host_network: bool,
    /// Dial worker pool size
    pub workers: usize,
    /// Probe container image
    pub image: String,
    /// Readiness polling interval
    pub poll_interval: Duration,
    /// Deadline after which the run is cancelled
    pub run_timeout: Option<Duration>,
}

impl Settings {
    /// Whether probe services have to be created for this run
    pub fn needs_services(&self) -> bool {
        self.test_services || self.test_external_ips || self.test_service_name
    }

    /// A fresh external IP pool for one run
    ///
    /// Allocation never spans runs: every run starts from the network address.
    pub fn external_ip_pool(&self) -> Option<ExternalIpPool> {
        self.external_cidr.map(ExternalIpPool::new)
    }

    /// Host-network `(source, destination)` combinations each pass kind runs
    pub fn host_network_combinations(&self) -> Vec<(bool, bool)> {
        if self.host_network {
            vec![(false, false), (true, false), (false, true), (true, true)]
        } else {
            vec![(false, false)]
        }
    }
}
