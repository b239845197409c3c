//! Integration tests for netcheck
//!
//! These tests need a live cluster and tell the story of how an operator
//! uses netcheck to check a cluster's data plane.
//!
//! # Test Organization
//!
//! - `provisioning`: Stories about the probe topology itself (namespace,
//!   probe pods, probe services) and its teardown
//!
//! - `connectivity`: Stories about full runs across every path kind
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored --nocapture
//!
//! # only the provisioning stories
//! cargo test --test kind provisioning -- --ignored
//! ```

mod connectivity;
mod helpers;
mod provisioning;
