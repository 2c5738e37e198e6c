//! Discovery directory.
//!
//! Maps a logical service name to the peers currently advertising it.
//! Lookups are polled; nothing is pushed to callers.

mod multicast;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

pub use multicast::{DirectoryConfig, MulticastDirectory};

/// What a node advertises under a service name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertising node name
    pub name: String,
    /// Address other nodes should use to reach it
    pub address: String,
    /// Port of the advertised service
    pub port: u16,
    /// Opaque payload carried with every announcement
    pub payload: Vec<u8>,
}

impl Advertisement {
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

/// One peer as heard by a lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub address: String,
    pub port: u16,
    pub payload: Vec<u8>,
}

/// A live advertisement. Dropping the handle without calling `shutdown`
/// leaves the announcement running until the process exits.
#[async_trait]
pub trait Broadcast: Send {
    /// Stop advertising. Consumes the handle so it can only happen once.
    async fn shutdown(self: Box<Self>) -> Result<()>;
}

/// Advertisement and lookup primitives over the local network
#[async_trait]
pub trait Directory: Send + Sync {
    /// Start advertising `ad` under `service`
    async fn advertise(&self, service: &str, ad: Advertisement) -> Result<Box<dyn Broadcast>>;

    /// Peers currently advertising `service`, keyed by name, without `exclude`
    async fn lookup_records(
        &self,
        service: &str,
        exclude: &str,
    ) -> Result<BTreeMap<String, Record>>;

    /// Addresses of the peers currently advertising `service`
    async fn lookup(&self, service: &str, exclude: &str) -> Result<BTreeMap<String, String>> {
        Ok(self
            .lookup_records(service, exclude)
            .await?
            .into_iter()
            .map(|(name, record)| (name, record.address))
            .collect())
    }
}
