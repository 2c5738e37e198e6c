//! Registry of the services enabled on this node.

use stratus_common::{ClusterError, ServiceType};

use super::{ClusterService, LocalService};
use crate::config::{NodeContext, ServicesConfig};

/// Services that should take part in clustering on this machine.
///
/// Mandatory services are always included; optional ones only when their
/// marker exists.
pub fn enabled_services(markers: &ServicesConfig) -> Vec<ServiceType> {
    ServiceType::ALL
        .into_iter()
        .filter(|service| {
            if service.is_mandatory() {
                return true;
            }

            let Some(marker) = markers.marker(*service) else {
                return false;
            };
            let present = marker.exists();
            tracing::debug!(service = %service, marker = %marker.display(), present, "Probed optional service");
            present
        })
        .collect()
}

/// Ordered collection of service handles with exactly one primary
pub struct ServiceRegistry {
    services: Vec<Box<dyn ClusterService>>,
    primary: usize,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.service_types()).finish()
    }
}

impl ServiceRegistry {
    /// Build a registry from handles, in insertion order
    pub fn new(services: Vec<Box<dyn ClusterService>>) -> Result<Self, ClusterError> {
        let mut seen = Vec::with_capacity(services.len());
        for service in &services {
            let service_type = service.service_type();
            if seen.contains(&service_type) {
                return Err(ClusterError::Config(format!(
                    "Service {service_type} registered twice"
                )));
            }
            seen.push(service_type);
        }

        let primary = seen
            .iter()
            .position(ServiceType::is_primary)
            .ok_or_else(|| ClusterError::Config(format!("Missing {} service", ServiceType::Stratus)))?;

        Ok(Self { services, primary })
    }

    /// Build file-backed handles for every enabled service
    pub fn from_node(node: &NodeContext, markers: &ServicesConfig) -> Result<Self, ClusterError> {
        let services = enabled_services(markers)
            .into_iter()
            .map(|service| {
                LocalService::new(service, node).map(|s| Box::new(s) as Box<dyn ClusterService>)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(services)
    }

    /// The service every other service depends on
    pub fn primary(&self) -> &dyn ClusterService {
        self.services[self.primary].as_ref()
    }

    /// Handles in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &dyn ClusterService> {
        self.services.iter().map(|s| &**s)
    }

    /// Handles with the primary first, then the rest in insertion order
    pub fn bootstrap_order(&self) -> impl Iterator<Item = &dyn ClusterService> {
        std::iter::once(self.primary()).chain(self.iter().filter(|s| !s.service_type().is_primary()))
    }

    pub fn get(&self, service: ServiceType) -> Option<&dyn ClusterService> {
        self.iter().find(|s| s.service_type() == service)
    }

    pub fn service_types(&self) -> Vec<ServiceType> {
        self.iter().map(|s| s.service_type()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeService;

    fn boxed(services: &[ServiceType]) -> Vec<Box<dyn ClusterService>> {
        let log = Default::default();
        services
            .iter()
            .map(|s| Box::new(FakeService::new(*s, &log)) as Box<dyn ClusterService>)
            .collect()
    }

    #[test]
    fn test_primary_first_for_any_composition() {
        let optional = [ServiceType::Compute, ServiceType::Storage, ServiceType::Network];

        for n in 0..=optional.len() {
            // Primary inserted last to prove ordering does not depend on insertion
            let mut types = optional[..n].to_vec();
            types.push(ServiceType::Stratus);

            let registry = ServiceRegistry::new(boxed(&types)).unwrap();
            let order: Vec<_> = registry.bootstrap_order().map(|s| s.service_type()).collect();

            assert_eq!(order.len(), n + 1);
            assert_eq!(order[0], ServiceType::Stratus);
            assert_eq!(&order[1..], &optional[..n]);
        }
    }

    #[test]
    fn test_missing_primary_is_config_error() {
        let result = ServiceRegistry::new(boxed(&[ServiceType::Compute]));
        assert!(matches!(result, Err(ClusterError::Config(_))));
    }

    #[test]
    fn test_duplicate_service_rejected() {
        let result = ServiceRegistry::new(boxed(&[ServiceType::Stratus, ServiceType::Stratus]));
        assert!(matches!(result, Err(ClusterError::Config(_))));
    }

    #[test]
    fn test_optional_services_follow_markers() {
        let dir = tempfile::tempdir().unwrap();
        let markers = ServicesConfig {
            storage_marker: dir.path().join("storage"),
            network_marker: dir.path().join("network"),
        };
        std::fs::create_dir(&markers.storage_marker).unwrap();

        assert_eq!(
            enabled_services(&markers),
            vec![ServiceType::Stratus, ServiceType::Compute, ServiceType::Storage]
        );
    }

    #[test]
    fn test_from_node_builds_local_services() {
        let dir = tempfile::tempdir().unwrap();
        let node = NodeContext {
            name: "a".to_string(),
            address: "10.0.0.1".to_string(),
            port: 9443,
            state_dir: dir.path().join("state"),
            token_ttl: std::time::Duration::from_secs(60),
        };
        let markers = ServicesConfig {
            storage_marker: dir.path().join("absent"),
            network_marker: dir.path().join("absent"),
        };

        let registry = ServiceRegistry::from_node(&node, &markers).unwrap();
        assert_eq!(registry.service_types(), vec![ServiceType::Stratus, ServiceType::Compute]);
        assert!(dir.path().join("state/compute").is_dir());
    }
}
