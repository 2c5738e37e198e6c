//! Multicast discovery directory (UDP).
//!
//! Every advertisement is a small JSON datagram re-sent to the discovery
//! group at a fixed interval. A lookup joins the group, listens for one
//! window, and folds what it heard into a name → record map.
//!
//! Shutting an advertisement down sends one last `withdrawn` datagram so
//! that listeners drop the name immediately instead of waiting for it to
//! go quiet.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use stratus_common::constants::{
    DEFAULT_ANNOUNCE_INTERVAL_MS, DEFAULT_DISCOVERY_GROUP, DEFAULT_DISCOVERY_PORT,
    DEFAULT_LOOKUP_WINDOW_MS, MAX_ANNOUNCEMENT_BYTES,
};

use super::{Advertisement, Broadcast, Directory, Record};

/// Multicast directory configuration
#[derive(Clone, Debug)]
pub struct DirectoryConfig {
    /// Multicast group (e.g., 239.255.77.77)
    pub group: Ipv4Addr,
    /// Group port
    pub port: u16,
    /// How often an advertisement is re-sent
    pub announce_interval: Duration,
    /// How long one lookup listens
    pub lookup_window: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_DISCOVERY_GROUP
                .parse()
                .unwrap_or(Ipv4Addr::new(239, 255, 77, 77)),
            port: DEFAULT_DISCOVERY_PORT,
            announce_interval: Duration::from_millis(DEFAULT_ANNOUNCE_INTERVAL_MS),
            lookup_window: Duration::from_millis(DEFAULT_LOOKUP_WINDOW_MS),
        }
    }
}

/// Datagram sent to the discovery group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Logical service name
    pub service: String,
    /// Advertising node
    pub name: String,
    /// Node address
    pub address: String,
    /// Service port
    pub port: u16,
    /// Base64 payload
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub payload: String,
    /// Set on the final datagram of an advertisement
    #[serde(default)]
    pub withdrawn: bool,
    /// Unix timestamp
    pub timestamp: i64,
    /// Software version
    pub version: String,
}

impl Announcement {
    pub fn new(service: &str, ad: &Advertisement) -> Self {
        Self {
            service: service.to_string(),
            name: ad.name.clone(),
            address: ad.address.clone(),
            port: ad.port,
            payload: STANDARD.encode(&ad.payload),
            withdrawn: false,
            timestamp: chrono::Utc::now().timestamp(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// The goodbye datagram for this announcement
    pub fn withdrawal(&self) -> Self {
        Self {
            payload: String::new(),
            withdrawn: true,
            timestamp: chrono::Utc::now().timestamp(),
            ..self.clone()
        }
    }

    /// Decoded payload bytes
    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.payload)
            .with_context(|| format!("Invalid payload from {:?}", self.name))
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self).context("Failed to serialize announcement")?;
        if bytes.len() > MAX_ANNOUNCEMENT_BYTES {
            bail!(
                "Announcement for {} is {} bytes (limit {})",
                self.service,
                bytes.len(),
                MAX_ANNOUNCEMENT_BYTES
            );
        }
        Ok(bytes)
    }
}

/// Fold one received announcement into the records of a lookup.
///
/// The first address heard for a name is kept for the rest of the window.
fn fold(
    records: &mut BTreeMap<String, Announcement>,
    announcement: Announcement,
    service: &str,
    exclude: &str,
) {
    if announcement.service != service || announcement.name == exclude {
        return;
    }

    if announcement.withdrawn {
        records.remove(&announcement.name);
        return;
    }

    records
        .entry(announcement.name.clone())
        .or_insert(announcement);
}

/// Discovery directory over UDP multicast
#[derive(Clone, Debug)]
pub struct MulticastDirectory {
    config: DirectoryConfig,
}

impl MulticastDirectory {
    pub fn new(config: DirectoryConfig) -> Self {
        Self { config }
    }

    /// Announcements heard for `service` during one lookup window
    pub async fn lookup_announcements(
        &self,
        service: &str,
        exclude: &str,
    ) -> Result<BTreeMap<String, Announcement>> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.config.port))
            .await
            .context("Failed to bind discovery listener socket")?;
        socket
            .join_multicast_v4(self.config.group, Ipv4Addr::UNSPECIFIED)
            .context("Failed to join discovery multicast group")?;

        let mut records = BTreeMap::new();
        let mut buf = vec![0u8; MAX_ANNOUNCEMENT_BYTES];
        let deadline = Instant::now() + self.config.lookup_window;

        loop {
            let received = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await
            {
                Ok(result) => result.context("Discovery receive error")?,
                Err(_) => break,
            };

            let (len, addr) = received;
            let announcement: Announcement = match serde_json::from_slice(&buf[..len]) {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!(addr = %addr, error = %e, "Invalid announcement");
                    continue;
                }
            };

            tracing::trace!(
                service = %announcement.service,
                name = %announcement.name,
                withdrawn = announcement.withdrawn,
                "Received announcement"
            );

            fold(&mut records, announcement, service, exclude);
        }

        Ok(records)
    }
}

#[async_trait]
impl Directory for MulticastDirectory {
    async fn advertise(&self, service: &str, ad: Advertisement) -> Result<Box<dyn Broadcast>> {
        let announcement = Announcement::new(service, &ad);
        let bytes = announcement.encode()?;
        let goodbye = announcement.withdrawal().encode()?;

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("Failed to bind discovery sender socket")?;
        socket
            .set_multicast_loop_v4(true)
            .context("Failed to enable multicast loopback")?;

        let target = SocketAddrV4::new(self.config.group, self.config.port);
        let interval = self.config.announce_interval;
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        tracing::debug!(service = %service, name = %ad.name, "Advertising");

        let service = service.to_string();
        let task = tokio::spawn(async move {
            loop {
                if let Err(e) = socket.send_to(&bytes, target).await {
                    tracing::warn!(service = %service, error = %e, "Failed to send announcement");
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = &mut stop_rx => break,
                }
            }

            if let Err(e) = socket.send_to(&goodbye, target).await {
                tracing::warn!(service = %service, error = %e, "Failed to send withdrawal");
            }
            tracing::debug!(service = %service, "Advertisement stopped");
        });

        Ok(Box::new(MulticastBroadcast { stop: stop_tx, task }))
    }

    async fn lookup_records(
        &self,
        service: &str,
        exclude: &str,
    ) -> Result<BTreeMap<String, Record>> {
        let announcements = self.lookup_announcements(service, exclude).await?;

        let mut records = BTreeMap::new();
        for (name, announcement) in announcements {
            let payload = match announcement.payload_bytes() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "Dropping announcement");
                    continue;
                }
            };

            records.insert(
                name,
                Record {
                    address: announcement.address,
                    port: announcement.port,
                    payload,
                },
            );
        }

        Ok(records)
    }
}

/// Handle to a running multicast advertisement
struct MulticastBroadcast {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[async_trait]
impl Broadcast for MulticastBroadcast {
    async fn shutdown(self: Box<Self>) -> Result<()> {
        // The task only exits on its own if it panicked.
        let _ = self.stop.send(());
        self.task.await.context("Advertisement task failed")
    }
}
