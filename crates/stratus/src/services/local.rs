//! File-backed service handle.
//!
//! Keeps one service's membership under `<state_dir>/<service>/`:
//! - `cluster.json` - members and key fingerprint, present once bootstrapped or joined
//! - `cluster.key` - signing key, only on the node that bootstrapped
//! - `tokens.json` - outstanding join tokens, one per peer, dropped once the peer joins

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use stratus_common::{ClusterError, Peer, ServiceType};

use super::token::{JoinClaims, TokenSigner, generate_secret, verify_token};
use super::{AddressInfo, ClusterService, ServiceStatus};
use crate::config::NodeContext;

/// Persisted membership of one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub service: ServiceType,
    pub members: Vec<Peer>,
    /// Fingerprint of the key that signs this cluster's tokens
    pub fingerprint: String,
    /// Unix timestamp of bootstrap or join
    pub formed_at: i64,
}

/// Issuer-side record of a token
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IssuedToken {
    secret: String,
    expires_at: i64,
}

/// A service whose cluster state lives on the local disk
pub struct LocalService {
    service: ServiceType,
    node: NodeContext,
    dir: PathBuf,
}

impl LocalService {
    /// Prepare the state directory of `service`.
    ///
    /// An unusable state directory is a configuration error.
    pub fn new(service: ServiceType, node: &NodeContext) -> Result<Self, ClusterError> {
        let dir = node.state_dir.join(service.as_str());
        std::fs::create_dir_all(&dir).map_err(|e| {
            ClusterError::Config(format!(
                "Cannot prepare {service} state directory {}: {e}",
                dir.display()
            ))
        })?;

        Ok(Self {
            service,
            node: node.clone(),
            dir,
        })
    }

    fn cluster_path(&self) -> PathBuf {
        self.dir.join("cluster.json")
    }

    fn key_path(&self) -> PathBuf {
        self.dir.join("cluster.key")
    }

    fn tokens_path(&self) -> PathBuf {
        self.dir.join("tokens.json")
    }

    fn local_peer(&self) -> Peer {
        Peer::new(&self.node.name, self.node.endpoint())
    }

    /// Current membership, or None if this node is not in a cluster
    pub async fn cluster_state(&self) -> Result<Option<ClusterState>> {
        read_json(&self.cluster_path()).await
    }

    async fn issued_tokens(&self) -> Result<BTreeMap<String, IssuedToken>> {
        Ok(read_json(&self.tokens_path()).await?.unwrap_or_default())
    }
}

#[async_trait]
impl ClusterService for LocalService {
    fn service_type(&self) -> ServiceType {
        self.service
    }

    fn address_info(&self) -> AddressInfo {
        AddressInfo {
            name: self.node.name.clone(),
            address: self.node.address.clone(),
            port: self.node.port,
        }
    }

    async fn bootstrap(&self) -> Result<()> {
        if self.cluster_state().await?.is_some() {
            bail!("{} is already part of a cluster", self.service);
        }

        let signer = TokenSigner::generate();
        signer.save(&self.key_path()).await?;

        let state = ClusterState {
            service: self.service,
            members: vec![self.local_peer()],
            fingerprint: signer.fingerprint(),
            formed_at: chrono::Utc::now().timestamp(),
        };
        write_json(&self.cluster_path(), &state).await?;

        tracing::debug!(service = %self.service, fingerprint = %state.fingerprint, "Cluster bootstrapped");
        Ok(())
    }

    async fn issue_token(&self, peer: &str) -> Result<String> {
        let state = self
            .cluster_state()
            .await?
            .with_context(|| format!("{} has not been bootstrapped", self.service))?;

        if peer == self.node.name {
            bail!("Cannot issue a token to the local node");
        }

        let signer = TokenSigner::load(&self.key_path()).await?;
        let ttl = i64::try_from(self.node.token_ttl.as_secs()).unwrap_or(i64::MAX);
        let now = chrono::Utc::now().timestamp();
        let expires_at = now.saturating_add(ttl);
        let secret = generate_secret();

        let token = signer.mint(JoinClaims {
            service: self.service,
            name: peer.to_string(),
            secret: secret.clone(),
            issuer: self.node.name.clone(),
            members: state.members,
            public_key: signer.public_key_b64(),
            fingerprint: signer.fingerprint(),
            expires_at,
        })?;

        // A new token replaces whatever was outstanding for this peer
        let mut issued = self.issued_tokens().await?;
        issued.retain(|_, t| t.expires_at >= now);
        issued.insert(peer.to_string(), IssuedToken { secret, expires_at });
        write_json(&self.tokens_path(), &issued).await?;

        Ok(token)
    }

    async fn join(&self, token: &str) -> Result<()> {
        if self.cluster_state().await?.is_some() {
            bail!("{} is already part of a cluster", self.service);
        }

        let claims = verify_token(token, &self.node.name, self.service)?;

        let mut members = claims.members;
        members.retain(|m| m.name != self.node.name);
        members.push(self.local_peer());

        let state = ClusterState {
            service: self.service,
            members,
            fingerprint: claims.fingerprint,
            formed_at: chrono::Utc::now().timestamp(),
        };
        write_json(&self.cluster_path(), &state).await?;

        tracing::debug!(service = %self.service, issuer = %claims.issuer, "Joined cluster");
        Ok(())
    }

    async fn record_member(&self, peer: &Peer) -> Result<()> {
        let mut state = self
            .cluster_state()
            .await?
            .with_context(|| format!("{} has not been bootstrapped", self.service))?;

        match state.members.iter_mut().find(|m| m.name == peer.name) {
            Some(member) => member.address = peer.address.clone(),
            None => state.members.push(peer.clone()),
        }
        write_json(&self.cluster_path(), &state).await?;

        let mut issued = self.issued_tokens().await?;
        if issued.remove(&peer.name).is_some() {
            write_json(&self.tokens_path(), &issued).await?;
        }

        tracing::debug!(service = %self.service, peer = %peer.name, "Recorded new member");
        Ok(())
    }

    async fn status(&self) -> Result<ServiceStatus> {
        let state = self.cluster_state().await?;
        Ok(ServiceStatus {
            service: self.service,
            bootstrapped: state.is_some(),
            members: state.map(|s| s.members).unwrap_or_default(),
        })
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .with_context(|| format!("Failed to parse {}", path.display())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Write through a temporary file so readers never see a partial document
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).context("Failed to serialize state")?;
    let tmp = path.with_extension("json.tmp");

    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    Ok(())
}
