//! `stratus status` - show local cluster membership.

use anyhow::Result;

use crate::config::AppConfig;
use crate::services::ServiceRegistry;

pub async fn run(config: &AppConfig) -> Result<()> {
    let node = config.node();
    let registry = ServiceRegistry::from_node(&node, &config.services)?;

    println!("{:<10} {:<12} MEMBERS", "SERVICE", "STATE");
    for service in registry.iter() {
        let status = service.status().await?;
        let state = if status.bootstrapped { "clustered" } else { "standalone" };
        let members: Vec<_> = status
            .members
            .iter()
            .map(|m| format!("{} ({})", m.name, m.address))
            .collect();

        println!("{:<10} {:<12} {}", status.service, state, members.join(", "));
    }

    Ok(())
}
