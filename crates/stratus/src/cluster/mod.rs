//! Cluster formation.
//!
//! Implements:
//! - Peer scanning (poll discovery until the operator stops it)
//! - Bootstrap coordination (bootstrap, issue, broadcast, reconcile)
//! - Join announcing (the other side of the broadcast)

mod coordinator;
mod join;
mod scanner;

use std::time::Duration;

use stratus_common::ClusterError;
use stratus_common::constants::{
    DEFAULT_JOIN_TIMEOUT_SECS, DEFAULT_RECONCILE_INTERVAL_MS, DEFAULT_SCAN_INTERVAL_SECS,
    DEFAULT_SETTLE_SECS,
};

pub use coordinator::Coordinator;
pub use join::JoinAnnouncer;
pub use scanner::{PeerScanner, ScanMode, operator_stop_signal};

/// Timing of scan, reconciliation, and join loops
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Pause between discovery polls while scanning
    pub scan_interval: Duration,
    /// Deadline for peers to consume their tokens, from broadcast start
    pub join_timeout: Duration,
    /// How long a joining node waits for its tokens; None waits until interrupted
    pub token_wait: Option<Duration>,
    /// Pause between reconciliation ticks
    pub reconcile_interval: Duration,
    /// How long a joined node keeps announcing itself
    pub settle_period: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(DEFAULT_SCAN_INTERVAL_SECS),
            join_timeout: Duration::from_secs(DEFAULT_JOIN_TIMEOUT_SECS),
            token_wait: None,
            reconcile_interval: Duration::from_millis(DEFAULT_RECONCILE_INTERVAL_MS),
            settle_period: Duration::from_secs(DEFAULT_SETTLE_SECS),
        }
    }
}

/// Combine the result of a loop with the shutdown of the advertisement it ran under.
///
/// The loop's own error wins; a shutdown failure is only logged then.
fn after_shutdown<T>(
    result: Result<T, ClusterError>,
    shutdown: Result<(), ClusterError>,
) -> Result<T, ClusterError> {
    match (result, shutdown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(shutdown_err)) => {
            tracing::error!(error = %shutdown_err, "Advertisement shutdown failed after error");
            Err(e)
        }
    }
}
