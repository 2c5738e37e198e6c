//! Common errors across Stratus components.

use thiserror::Error;

use crate::types::ServiceType;

/// Errors raised while forming or joining a cluster
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Discovery lookup or advertisement failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Local configuration is missing or unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// The primary service has not been bootstrapped on this node
    #[error("Stratus is uninitialized, run 'stratus init' first")]
    Uninitialized,

    /// A local service failed to bootstrap
    #[error("Failed to bootstrap local {service}: {reason}")]
    Bootstrap { service: ServiceType, reason: String },

    /// A join token could not be issued
    #[error("Failed to issue {service} token for peer {peer:?}: {reason}")]
    Issuance {
        service: ServiceType,
        peer: String,
        reason: String,
    },

    /// The token set could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The token broadcast could not be shut down
    #[error("Broadcast error: {0}")]
    Broadcast(String),

    /// A joined peer could not be recorded in a local service's membership
    #[error("Failed to record peer {peer:?} in {service} membership: {reason}")]
    Membership {
        service: ServiceType,
        peer: String,
        reason: String,
    },

    /// A local service failed to join an existing cluster
    #[error("Failed to join {service} cluster: {reason}")]
    Join { service: ServiceType, reason: String },

    /// Local I/O failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl ClusterError {
    /// Returns the (service, peer) pair this error is about, if any
    pub fn target(&self) -> Option<(ServiceType, &str)> {
        match self {
            Self::Issuance { service, peer, .. } | Self::Membership { service, peer, .. } => {
                Some((*service, peer.as_str()))
            }
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClusterError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issuance_error_names_pair() {
        let err = ClusterError::Issuance {
            service: ServiceType::Storage,
            peer: "b".to_string(),
            reason: "connection refused".to_string(),
        };

        assert_eq!(err.target(), Some((ServiceType::Storage, "b")));
        assert_eq!(
            err.to_string(),
            "Failed to issue storage token for peer \"b\": connection refused"
        );
    }

    #[test]
    fn test_membership_error_names_pair() {
        let err = ClusterError::Membership {
            service: ServiceType::Compute,
            peer: "c".to_string(),
            reason: "disk full".to_string(),
        };

        assert_eq!(err.target(), Some((ServiceType::Compute, "c")));
        assert_eq!(ClusterError::Discovery("socket closed".into()).target(), None);
        assert!(ClusterError::Uninitialized.to_string().contains("stratus init"));
    }
}
