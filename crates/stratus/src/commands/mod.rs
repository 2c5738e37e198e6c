//! Operator commands.

use anyhow::Result;
use std::collections::BTreeMap;

use stratus_common::SessionOutcome;
use stratus_common::constants::services;

use crate::cluster::{PeerScanner, ScanMode, SessionConfig, operator_stop_signal};
use crate::config::NodeContext;
use crate::discovery::Directory;

pub mod add;
pub mod init;
pub mod join;
pub mod status;

/// Scan for nodes waiting to join, interactively unless `auto`
async fn scan_peers<D: Directory + ?Sized>(
    directory: &D,
    node: &NodeContext,
    session: &SessionConfig,
    auto: bool,
) -> Result<BTreeMap<String, String>> {
    println!("Scanning for eligible servers...");

    let mode = if auto {
        ScanMode::Auto
    } else {
        println!("Press enter to end scanning for servers");
        ScanMode::UntilSignalled(operator_stop_signal())
    };

    let scanner = PeerScanner::new(directory, session.scan_interval);
    Ok(scanner.scan(services::CLUSTER, &node.name, mode).await?)
}

/// Tell the operator how the session ended
fn report(outcome: &SessionOutcome) {
    match outcome {
        SessionOutcome::Complete => {
            tracing::info!("All peers joined");
        }
        SessionOutcome::TimedOut { remaining } => {
            tracing::warn!(remaining = remaining.len(), "Session ended before every peer joined");
            println!(
                "Cluster formed without {} peer(s); run 'stratus add' to retry them",
                remaining.len()
            );
        }
    }
}
