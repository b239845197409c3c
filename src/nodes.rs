//! Node eligibility for probe placement

use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use regex::Regex;
use tracing::debug;

use crate::{Error, Result};

/// The "Ready" condition type for nodes
pub const CONDITION_READY: &str = "Ready";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Filter expression that default-matches every node
pub const MATCH_ALL: &str = ".*";

/// Regular expression node names must match to receive probes.
///
/// Matching is unanchored: `worker` matches `pool-worker-1`.
#[derive(Clone, Debug)]
pub struct NodeFilter {
    regex: Regex,
}

impl NodeFilter {
    /// Compile a node filter; an invalid expression is a configuration error
    pub fn new(expr: &str) -> Result<Self> {
        let regex = Regex::new(expr)
            .map_err(|e| Error::config(format!("invalid node filter '{}': {}", expr, e)))?;
        Ok(Self { regex })
    }

    /// Whether the node name passes the filter
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// The source expression
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

/// A node is eligible iff it is schedulable, reports at least one condition,
/// matches the filter, and no `Ready` condition reports anything but `True`.
pub fn is_eligible(node: &Node, filter: &NodeFilter) -> bool {
    let name = node.name_any();

    let unschedulable = node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false);
    if unschedulable {
        return false;
    }

    let conditions = match node.status.as_ref().and_then(|s| s.conditions.as_ref()) {
        Some(conds) if !conds.is_empty() => conds,
        _ => return false,
    };

    if !filter.matches(&name) {
        return false;
    }

    for cond in conditions {
        if cond.type_ == CONDITION_READY && cond.status != STATUS_TRUE {
            debug!(node = %name, status = %cond.status, "ignoring node that is not ready");
            return false;
        }
    }
    true
}

/// Select the eligible nodes, sorted by name
pub fn eligible_nodes(nodes: &[Arc<Node>], filter: &NodeFilter) -> Vec<Arc<Node>> {
    let mut eligible: Vec<Arc<Node>> = nodes
        .iter()
        .filter(|node| is_eligible(node, filter))
        .cloned()
        .collect();
    eligible.sort_by_key(|node| node.name_any());
    eligible
}
