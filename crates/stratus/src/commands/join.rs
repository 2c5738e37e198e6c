//! `stratus join` - wait to be added to a cluster.

use anyhow::Result;

use crate::cluster::JoinAnnouncer;
use crate::config::AppConfig;
use crate::discovery::MulticastDirectory;
use crate::services::ServiceRegistry;

pub async fn run(config: &AppConfig) -> Result<()> {
    let node = config.node();
    let registry = ServiceRegistry::from_node(&node, &config.services)?;
    let directory = MulticastDirectory::new(config.directory());

    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    let announcer = JoinAnnouncer::new(&directory, &registry, &node, config.session());
    let joined = announcer.run(interrupted).await?;

    tracing::info!(services = ?joined, "Join complete");
    println!("Joined {} service cluster(s)", joined.len());
    Ok(())
}
