//! Core types shared across Stratus components.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ClusterError;

/// A candidate or confirmed cluster member.
///
/// The name is unique across the deployment; the address is whatever the
/// peer advertised the first time it was seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    pub address: String,
}

impl Peer {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// One independently clusterable subsystem.
///
/// `Stratus` is the primary coordination service and must bootstrap before
/// all others. `Compute` is mandatory, `Storage` and `Network` are only
/// present when enabled on the local machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Stratus,
    Compute,
    Storage,
    Network,
}

impl ServiceType {
    pub const ALL: [ServiceType; 4] = [
        ServiceType::Stratus,
        ServiceType::Compute,
        ServiceType::Storage,
        ServiceType::Network,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stratus => "stratus",
            Self::Compute => "compute",
            Self::Storage => "storage",
            Self::Network => "network",
        }
    }

    /// The service every other service depends on
    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Stratus)
    }

    /// Mandatory services are always part of the registry
    pub fn is_mandatory(&self) -> bool {
        matches!(self, Self::Stratus | Self::Compute)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ClusterError::Config(format!("Unknown service type {s:?}")))
    }
}

/// Join tokens for every pending peer, keyed by peer name then service.
///
/// Serialized as `{"peer": {"service": "token"}}` for broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSet(BTreeMap<String, BTreeMap<ServiceType, String>>);

impl TokenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the token for one (service, peer) pair, replacing any previous one
    pub fn insert(&mut self, peer: &str, service: ServiceType, token: String) -> Option<String> {
        self.0
            .entry(peer.to_string())
            .or_default()
            .insert(service, token)
    }

    /// Drop every token of a peer. Returns false if the peer was not pending.
    pub fn remove_peer(&mut self, peer: &str) -> bool {
        self.0.remove(peer).is_some()
    }

    /// Tokens issued to one peer
    pub fn tokens_for(&self, peer: &str) -> Option<&BTreeMap<ServiceType, String>> {
        self.0.get(peer)
    }

    /// Names of peers still holding tokens
    pub fn peers(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of pending peers
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Number of (service, peer) tokens
    pub fn token_count(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ClusterError> {
        serde_json::to_vec(self)
            .map_err(|e| ClusterError::Serialization(format!("Failed to marshal list of tokens: {e}")))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ClusterError> {
        serde_json::from_slice(bytes)
            .map_err(|e| ClusterError::Serialization(format!("Failed to parse list of tokens: {e}")))
    }
}

/// How a bootstrap session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every peer consumed its tokens
    Complete,
    /// The deadline elapsed; `remaining` holds peers that never joined
    TimedOut { remaining: TokenSet },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_names() {
        for service in ServiceType::ALL {
            assert_eq!(service.as_str().parse::<ServiceType>().unwrap(), service);
        }
        assert!("ceph".parse::<ServiceType>().is_err());
        assert!(ServiceType::Stratus.is_primary());
        assert!(ServiceType::Compute.is_mandatory());
        assert!(!ServiceType::Network.is_mandatory());
    }

    #[test]
    fn test_token_set_wire_format() {
        let mut tokens = TokenSet::new();
        tokens.insert("node-b", ServiceType::Stratus, "tok-1".to_string());
        tokens.insert("node-b", ServiceType::Storage, "tok-2".to_string());

        let json = String::from_utf8(tokens.to_bytes().unwrap()).unwrap();
        assert_eq!(json, r#"{"node-b":{"stratus":"tok-1","storage":"tok-2"}}"#);

        let parsed = TokenSet::from_slice(json.as_bytes()).unwrap();
        assert_eq!(parsed, tokens);
        assert_eq!(parsed.token_count(), 2);
    }

    #[test]
    fn test_remove_peer_is_idempotent() {
        let mut tokens = TokenSet::new();
        tokens.insert("a", ServiceType::Compute, "t".to_string());

        assert!(tokens.remove_peer("a"));
        assert!(!tokens.remove_peer("a"));
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_insert_replaces_outstanding_token() {
        let mut tokens = TokenSet::new();
        assert!(tokens.insert("a", ServiceType::Compute, "old".to_string()).is_none());
        assert_eq!(
            tokens.insert("a", ServiceType::Compute, "new".to_string()).as_deref(),
            Some("old")
        );
        assert_eq!(tokens.token_count(), 1);
    }
}
