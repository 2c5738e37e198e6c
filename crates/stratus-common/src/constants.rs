//! Shared constants for Stratus components.

/// Discovery service names
pub mod services {
    /// Advertised by nodes that are waiting to be added to a cluster
    pub const CLUSTER: &str = "_stratus";

    /// Advertised by the bootstrapping node, carries the serialized token set
    pub const TOKEN: &str = "_stratus_token";

    /// Advertised by nodes that have finished joining
    pub const JOINED: &str = "_stratus_joined";
}

/// Default multicast group for the discovery directory
pub const DEFAULT_DISCOVERY_GROUP: &str = "239.255.77.77";

/// Default multicast port for the discovery directory
pub const DEFAULT_DISCOVERY_PORT: u16 = 5354;

/// Default port the local services listen on
pub const DEFAULT_SERVICE_PORT: u16 = 9443;

/// Default state directory
pub const DEFAULT_STATE_DIR: &str = "/var/lib/stratus";

/// How often an advertisement is re-sent (milliseconds)
pub const DEFAULT_ANNOUNCE_INTERVAL_MS: u64 = 1000;

/// How long a single lookup listens for announcements (milliseconds)
pub const DEFAULT_LOOKUP_WINDOW_MS: u64 = 1500;

/// Pause between peer scan polls (seconds)
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 5;

/// Deadline for peers to consume their join tokens (seconds)
pub const DEFAULT_JOIN_TIMEOUT_SECS: u64 = 60;

/// Pause between reconciliation ticks (milliseconds)
pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 100;

/// How long a joined node keeps announcing itself (seconds)
pub const DEFAULT_SETTLE_SECS: u64 = 5;

/// Join token validity (seconds)
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Largest datagram the directory will send or accept
pub const MAX_ANNOUNCEMENT_BYTES: usize = 65_507;
