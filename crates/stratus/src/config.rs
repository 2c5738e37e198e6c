//! Configuration management for Stratus.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::{Ipv4Addr, UdpSocket};
use std::path::{Path, PathBuf};
use std::time::Duration;

use stratus_common::ServiceType;
use stratus_common::constants::{
    DEFAULT_ANNOUNCE_INTERVAL_MS, DEFAULT_DISCOVERY_GROUP, DEFAULT_DISCOVERY_PORT,
    DEFAULT_JOIN_TIMEOUT_SECS, DEFAULT_LOOKUP_WINDOW_MS, DEFAULT_RECONCILE_INTERVAL_MS,
    DEFAULT_SCAN_INTERVAL_SECS, DEFAULT_SERVICE_PORT, DEFAULT_SETTLE_SECS, DEFAULT_STATE_DIR,
    DEFAULT_TOKEN_TTL_SECS,
};

use crate::cluster::SessionConfig;
use crate::discovery::DirectoryConfig;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// This node's name (defaults to the hostname)
    #[serde(default = "default_name")]
    pub name: String,

    /// Address other nodes use to reach this one
    #[serde(default = "default_address")]
    pub address: String,

    /// Port the local services listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root of the per-service state directories
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Discovery directory configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Scan and join timing
    #[serde(default)]
    pub session: SessionSettings,

    /// Optional service enablement markers
    #[serde(default)]
    pub services: ServicesConfig,
}

/// Multicast discovery settings
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Multicast group
    #[serde(default = "default_group")]
    pub group: Ipv4Addr,

    /// Multicast port
    #[serde(default = "default_discovery_port")]
    pub port: u16,

    /// Re-send interval of advertisements in milliseconds
    #[serde(default = "default_announce_interval")]
    pub announce_interval_ms: u64,

    /// Listen window of one lookup in milliseconds
    #[serde(default = "default_lookup_window")]
    pub lookup_window_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            port: default_discovery_port(),
            announce_interval_ms: default_announce_interval(),
            lookup_window_ms: default_lookup_window(),
        }
    }
}

/// Session timing settings
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// Pause between peer scan polls in seconds
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Deadline for peers to join in seconds
    #[serde(default = "default_join_timeout")]
    pub join_timeout_secs: u64,

    /// How long `join` waits for a token broadcast in seconds; unset waits until interrupted
    #[serde(default)]
    pub token_wait_secs: Option<u64>,

    /// Pause between reconciliation ticks in milliseconds
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_ms: u64,

    /// Join token validity in seconds
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// How long a joined node keeps announcing itself in seconds
    #[serde(default = "default_settle")]
    pub settle_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            join_timeout_secs: default_join_timeout(),
            token_wait_secs: None,
            reconcile_interval_ms: default_reconcile_interval(),
            token_ttl_secs: default_token_ttl(),
            settle_secs: default_settle(),
        }
    }
}

/// Paths whose presence enables an optional service
#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    /// Storage clustering marker
    #[serde(default = "default_storage_marker")]
    pub storage_marker: PathBuf,

    /// Network clustering marker
    #[serde(default = "default_network_marker")]
    pub network_marker: PathBuf,
}

impl ServicesConfig {
    /// Enablement marker of an optional service. Mandatory services have none.
    pub fn marker(&self, service: ServiceType) -> Option<&Path> {
        match service {
            ServiceType::Storage => Some(self.storage_marker.as_path()),
            ServiceType::Network => Some(self.network_marker.as_path()),
            ServiceType::Stratus | ServiceType::Compute => None,
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            storage_marker: default_storage_marker(),
            network_marker: default_network_marker(),
        }
    }
}

/// Identity of the local node, threaded into every component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContext {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub state_dir: PathBuf,
    pub token_ttl: Duration,
}

impl NodeContext {
    /// Address and port joined for use in join tokens
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

// Default value functions
fn default_port() -> u16 { DEFAULT_SERVICE_PORT }
fn default_state_dir() -> PathBuf { PathBuf::from(DEFAULT_STATE_DIR) }
fn default_group() -> Ipv4Addr {
    DEFAULT_DISCOVERY_GROUP.parse().unwrap_or(Ipv4Addr::new(239, 255, 77, 77))
}
fn default_discovery_port() -> u16 { DEFAULT_DISCOVERY_PORT }
fn default_announce_interval() -> u64 { DEFAULT_ANNOUNCE_INTERVAL_MS }
fn default_lookup_window() -> u64 { DEFAULT_LOOKUP_WINDOW_MS }
fn default_scan_interval() -> u64 { DEFAULT_SCAN_INTERVAL_SECS }
fn default_join_timeout() -> u64 { DEFAULT_JOIN_TIMEOUT_SECS } // 1 minute
fn default_reconcile_interval() -> u64 { DEFAULT_RECONCILE_INTERVAL_MS }
fn default_token_ttl() -> u64 { DEFAULT_TOKEN_TTL_SECS } // 1 hour
fn default_settle() -> u64 { DEFAULT_SETTLE_SECS }
fn default_storage_marker() -> PathBuf { PathBuf::from("/var/lib/stratus/markers/storage") }
fn default_network_marker() -> PathBuf { PathBuf::from("/var/lib/stratus/markers/network") }

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Address of the interface that routes towards the discovery group
fn default_address() -> String {
    let probe = UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect((default_group(), DEFAULT_DISCOVERY_PORT))?;
            socket.local_addr()
        });

    match probe {
        Ok(addr) if !addr.ip().is_unspecified() => addr.ip().to_string(),
        _ => Ipv4Addr::LOCALHOST.to_string(),
    }
}

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!("Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref name) = args.name {
            config.name = name.clone();
        }
        if let Some(ref address) = args.address {
            config.address = address.clone();
        }
        if let Some(ref state_dir) = args.state_dir {
            config.state_dir = state_dir.clone();
        }

        Ok(config)
    }

    pub fn node(&self) -> NodeContext {
        NodeContext {
            name: self.name.clone(),
            address: self.address.clone(),
            port: self.port,
            state_dir: self.state_dir.clone(),
            token_ttl: Duration::from_secs(self.session.token_ttl_secs),
        }
    }

    pub fn directory(&self) -> DirectoryConfig {
        DirectoryConfig {
            group: self.discovery.group,
            port: self.discovery.port,
            announce_interval: Duration::from_millis(self.discovery.announce_interval_ms),
            lookup_window: Duration::from_millis(self.discovery.lookup_window_ms),
        }
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            scan_interval: Duration::from_secs(self.session.scan_interval_secs),
            join_timeout: Duration::from_secs(self.session.join_timeout_secs),
            token_wait: self.session.token_wait_secs.map(Duration::from_secs),
            reconcile_interval: Duration::from_millis(self.session.reconcile_interval_ms),
            settle_period: Duration::from_secs(self.session.settle_secs),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            address: default_address(),
            port: default_port(),
            state_dir: default_state_dir(),
            discovery: DiscoveryConfig::default(),
            session: SessionSettings::default(),
            services: ServicesConfig::default(),
        }
    }
}
