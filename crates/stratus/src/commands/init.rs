//! `stratus init` - bootstrap a new cluster.

use anyhow::Result;

use crate::cluster::Coordinator;
use crate::config::AppConfig;
use crate::discovery::MulticastDirectory;
use crate::services::ServiceRegistry;

pub async fn run(config: &AppConfig, auto: bool) -> Result<()> {
    let node = config.node();
    let session = config.session();
    let registry = ServiceRegistry::from_node(&node, &config.services)?;
    let directory = MulticastDirectory::new(config.directory());

    tracing::info!(name = %node.name, address = %node.address, services = ?registry, "Initializing");

    let peers = super::scan_peers(&directory, &node, &session, auto).await?;

    let mut coordinator = Coordinator::new(&directory, &registry, &node, session);
    let outcome = coordinator.bootstrap(&peers).await?;

    super::report(&outcome);
    Ok(())
}
