//! Clustered services driven by the coordinator.
//!
//! Each service is bootstrapped, issues join tokens, and joins existing
//! clusters on its own; this module only exposes those capabilities
//! behind one trait and collects the enabled ones in a registry.

mod local;
mod registry;
mod token;

use anyhow::Result;
use async_trait::async_trait;
use stratus_common::{Peer, ServiceType};

pub use local::LocalService;
pub use registry::ServiceRegistry;

/// Where a service can be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    pub name: String,
    pub address: String,
    pub port: u16,
}

/// Local view of one service's cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub service: ServiceType,
    pub bootstrapped: bool,
    pub members: Vec<Peer>,
}

/// Capability set of a clusterable service
#[async_trait]
pub trait ClusterService: Send + Sync {
    fn service_type(&self) -> ServiceType;

    fn address_info(&self) -> AddressInfo;

    /// Form a new single-member cluster on this machine
    async fn bootstrap(&self) -> Result<()>;

    /// Issue a single-use token allowing `peer` to join
    async fn issue_token(&self, peer: &str) -> Result<String>;

    /// Join an existing cluster with a token issued for this node
    async fn join(&self, token: &str) -> Result<()>;

    /// Record a peer that joined with a token issued here, spending that token
    async fn record_member(&self, peer: &Peer) -> Result<()>;

    async fn status(&self) -> Result<ServiceStatus>;
}
