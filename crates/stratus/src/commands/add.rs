//! `stratus add` - bring new nodes into an existing cluster.

use anyhow::Result;

use stratus_common::ClusterError;

use crate::cluster::Coordinator;
use crate::config::AppConfig;
use crate::discovery::MulticastDirectory;
use crate::services::ServiceRegistry;

pub async fn run(config: &AppConfig, auto: bool) -> Result<()> {
    let node = config.node();
    let session = config.session();
    let registry = ServiceRegistry::from_node(&node, &config.services)?;

    ensure_initialized(&registry).await?;

    let directory = MulticastDirectory::new(config.directory());
    let peers = super::scan_peers(&directory, &node, &session, auto).await?;

    let mut coordinator = Coordinator::new(&directory, &registry, &node, session);
    let outcome = coordinator.form(&peers).await?;

    super::report(&outcome);
    Ok(())
}

/// Every enabled service must already be clustered on this node
async fn ensure_initialized(registry: &ServiceRegistry) -> Result<(), ClusterError> {
    for service in registry.bootstrap_order() {
        let service_type = service.service_type();
        let status = service.status().await.map_err(|e| {
            ClusterError::Config(format!("Failed to get {service_type} status: {e:#}"))
        })?;

        if status.bootstrapped {
            continue;
        }

        if service_type.is_primary() {
            return Err(ClusterError::Uninitialized);
        }

        return Err(ClusterError::Config(format!(
            "{service_type} is enabled but not clustered on this node"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeContext;
    use crate::services::{ClusterService, LocalService};
    use std::time::Duration;
    use stratus_common::ServiceType;

    fn local_registry(dir: &std::path::Path) -> ServiceRegistry {
        let node = NodeContext {
            name: "a".to_string(),
            address: "10.0.0.1".to_string(),
            port: 9443,
            state_dir: dir.to_path_buf(),
            token_ttl: Duration::from_secs(60),
        };
        let services = [ServiceType::Stratus, ServiceType::Compute]
            .into_iter()
            .map(|s| Box::new(LocalService::new(s, &node).unwrap()) as Box<dyn ClusterService>)
            .collect();
        ServiceRegistry::new(services).unwrap()
    }

    #[tokio::test]
    async fn test_add_requires_init() {
        let dir = tempfile::tempdir().unwrap();
        let registry = local_registry(dir.path());

        let err = ensure_initialized(&registry).await.unwrap_err();
        assert!(matches!(err, ClusterError::Uninitialized));
    }

    #[tokio::test]
    async fn test_add_rejects_unclustered_secondary() {
        let dir = tempfile::tempdir().unwrap();
        let registry = local_registry(dir.path());
        registry.primary().bootstrap().await.unwrap();

        let err = ensure_initialized(&registry).await.unwrap_err();
        assert!(matches!(err, ClusterError::Config(_)));

        registry.get(ServiceType::Compute).unwrap().bootstrap().await.unwrap();
        tokio_test::assert_ok!(ensure_initialized(&registry).await);
    }
}
