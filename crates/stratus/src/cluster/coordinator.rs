//! Bootstrap coordination.
//!
//! Drives one session through:
//! `Idle → LocalBootstrapping → TokenIssuing → Reconciling → Complete | TimedOut`
//!
//! The token broadcast is shut down exactly once on every path that started
//! it, including when reconciliation fails.

use std::collections::BTreeMap;
use tokio::time::Instant;

use stratus_common::constants::services;
use stratus_common::{ClusterError, Peer, ServiceType, SessionOutcome, TokenSet};

use super::{SessionConfig, after_shutdown};
use crate::config::NodeContext;
use crate::discovery::{Advertisement, Directory, Record};
use crate::services::ServiceRegistry;

/// Where a session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    LocalBootstrapping,
    TokenIssuing,
    Reconciling,
    Complete,
    TimedOut,
}

/// Forms a cluster from this node and a set of discovered peers
pub struct Coordinator<'a, D: Directory + ?Sized> {
    directory: &'a D,
    registry: &'a ServiceRegistry,
    node: &'a NodeContext,
    config: SessionConfig,
    state: SessionState,
}

impl<'a, D: Directory + ?Sized> Coordinator<'a, D> {
    pub fn new(
        directory: &'a D,
        registry: &'a ServiceRegistry,
        node: &'a NodeContext,
        config: SessionConfig,
    ) -> Self {
        Self {
            directory,
            registry,
            node,
            config,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn enter(&mut self, state: SessionState) {
        tracing::debug!(from = ?self.state, to = ?state, "Session state");
        self.state = state;
    }

    /// Bootstrap every local service, then bring `peers` into the cluster
    pub async fn bootstrap(
        &mut self,
        peers: &BTreeMap<String, String>,
    ) -> Result<SessionOutcome, ClusterError> {
        println!("Initializing a new cluster");
        self.bootstrap_local().await?;
        self.form(peers).await
    }

    /// Bring `peers` into the already bootstrapped cluster
    pub async fn form(
        &mut self,
        peers: &BTreeMap<String, String>,
    ) -> Result<SessionOutcome, ClusterError> {
        let tokens = self.issue_tokens(peers).await?;
        self.distribute(tokens).await
    }

    /// Bootstrap the primary service, then the rest in registry order
    async fn bootstrap_local(&mut self) -> Result<(), ClusterError> {
        self.enter(SessionState::LocalBootstrapping);

        for service in self.registry.bootstrap_order() {
            let service_type = service.service_type();
            service
                .bootstrap()
                .await
                .map_err(|e| ClusterError::Bootstrap {
                    service: service_type,
                    reason: format!("{e:#}"),
                })?;

            tracing::info!(service = %service_type, "Local service bootstrapped");
            println!(" Local {service_type} has been bootstrapped");
        }

        Ok(())
    }

    /// Issue one token per (service, peer) pair.
    ///
    /// A failure aborts issuance; tokens already issued are left outstanding.
    pub async fn issue_tokens(
        &mut self,
        peers: &BTreeMap<String, String>,
    ) -> Result<TokenSet, ClusterError> {
        self.enter(SessionState::TokenIssuing);

        let mut tokens = TokenSet::new();
        for service in self.registry.iter() {
            let service_type = service.service_type();
            for peer in peers.keys() {
                let token = service.issue_token(peer).await.map_err(|e| {
                    ClusterError::Issuance {
                        service: service_type,
                        peer: peer.clone(),
                        reason: format!("{e:#}"),
                    }
                })?;

                tracing::debug!(service = %service_type, peer = %peer, "Issued join token");
                tokens.insert(peer, service_type, token);
            }
        }

        Ok(tokens)
    }

    /// Broadcast `tokens` and wait for their holders to join
    async fn distribute(&mut self, tokens: TokenSet) -> Result<SessionOutcome, ClusterError> {
        let payload = tokens.to_bytes()?;

        println!("Awaiting cluster formation...");
        let local = self.registry.primary().address_info();
        let ad = Advertisement::new(local.name, local.address, local.port).with_payload(payload);
        let broadcast = self
            .directory
            .advertise(services::TOKEN, ad)
            .await
            .map_err(|e| {
                ClusterError::Discovery(format!("Failed to begin join token broadcast: {e:#}"))
            })?;

        self.enter(SessionState::Reconciling);
        let deadline = Instant::now() + self.config.join_timeout;
        let result = self.reconcile(tokens, deadline).await;

        tracing::info!("Shutting down broadcast");
        let shutdown = broadcast.shutdown().await.map_err(|e| {
            ClusterError::Broadcast(format!("Failed to shutdown join token broadcast: {e:#}"))
        });

        let outcome = after_shutdown(result, shutdown)?;

        match &outcome {
            SessionOutcome::Complete => {
                self.enter(SessionState::Complete);
                println!("Cluster initialization is complete");
            }
            SessionOutcome::TimedOut { remaining } => {
                self.enter(SessionState::TimedOut);
                let missing: Vec<_> = remaining.peers().collect();
                tracing::warn!(missing = ?missing, "Timed out waiting for peers to join");
                println!(
                    "Timed out waiting for {} peer(s) to join: {}",
                    missing.len(),
                    missing.join(", ")
                );
            }
        }

        Ok(outcome)
    }

    /// Remove peers from `tokens` as they announce themselves joined
    async fn reconcile(
        &self,
        mut tokens: TokenSet,
        deadline: Instant,
    ) -> Result<SessionOutcome, ClusterError> {
        loop {
            if Instant::now() >= deadline {
                return Ok(SessionOutcome::TimedOut { remaining: tokens });
            }

            let joined = self
                .directory
                .lookup_records(services::JOINED, &self.node.name)
                .await
                .map_err(|e| {
                    ClusterError::Discovery(format!(
                        "Failed to lookup records from new cluster members: {e:#}"
                    ))
                })?;

            for (peer, record) in &joined {
                if tokens.remove_peer(peer) {
                    tracing::info!(peer = %peer, "Peer joined");
                    println!(" Peer {peer:?} has joined the cluster");
                    self.record_member(peer, record).await?;
                }
            }

            if tokens.is_empty() {
                return Ok(SessionOutcome::Complete);
            }

            tokio::time::sleep(self.config.reconcile_interval).await;
        }
    }

    /// Add a joined peer to the membership of each local service it joined.
    ///
    /// The join announcement lists those services; an announcement without
    /// that list counts as joining all of them.
    async fn record_member(&self, peer: &str, record: &Record) -> Result<(), ClusterError> {
        let joined: Option<Vec<ServiceType>> = if record.payload.is_empty() {
            None
        } else {
            match serde_json::from_slice(&record.payload) {
                Ok(services) => Some(services),
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "Unreadable join announcement");
                    None
                }
            }
        };

        let member = Peer::new(peer, format!("{}:{}", record.address, record.port));
        for service in self.registry.bootstrap_order() {
            let service_type = service.service_type();
            if joined.as_ref().is_some_and(|j| !j.contains(&service_type)) {
                continue;
            }

            service
                .record_member(&member)
                .await
                .map_err(|e| ClusterError::Membership {
                    service: service_type,
                    peer: peer.to_string(),
                    reason: format!("{e:#}"),
                })?;
        }

        Ok(())
    }
}
