//! Join announcing.
//!
//! The joining side of a bootstrap session: advertise this node as a
//! candidate, wait for a token broadcast naming it, join each local
//! service with its token, then announce the join so the coordinator can
//! stop waiting for this node.

use std::collections::BTreeMap;
use tokio::time::Instant;

use stratus_common::constants::services;
use stratus_common::{ClusterError, ServiceType, TokenSet};

use super::{SessionConfig, after_shutdown};
use crate::config::NodeContext;
use crate::discovery::{Advertisement, Directory};
use crate::services::ServiceRegistry;

pub struct JoinAnnouncer<'a, D: Directory + ?Sized> {
    directory: &'a D,
    registry: &'a ServiceRegistry,
    node: &'a NodeContext,
    config: SessionConfig,
}

impl<'a, D: Directory + ?Sized> JoinAnnouncer<'a, D> {
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
        }
    }

    fn advertisement(&self) -> Advertisement {
        Advertisement::new(&self.node.name, &self.node.address, self.node.port)
    }

    /// Wait for tokens, join, and announce. Returns the services joined.
    ///
    /// Waiting for tokens stops early if `interrupted` resolves; the presence
    /// advertisement is withdrawn either way.
    pub async fn run(
        &self,
        interrupted: impl Future<Output = ()>,
    ) -> Result<Vec<ServiceType>, ClusterError> {
        println!("Waiting to be added to a cluster as {:?}", self.node.name);

        let presence = self
            .directory
            .advertise(services::CLUSTER, self.advertisement())
            .await
            .map_err(|e| ClusterError::Discovery(format!("Failed to advertise this node: {e:#}")))?;

        let result = tokio::select! {
            result = self.await_tokens() => result,
            _ = interrupted => Err(ClusterError::Discovery(
                "Interrupted while waiting for join tokens".to_string(),
            )),
        };
        let shutdown = presence
            .shutdown()
            .await
            .map_err(|e| ClusterError::Broadcast(format!("Failed to stop advertising: {e:#}")));
        let (issuer, tokens) = after_shutdown(result, shutdown)?;

        tracing::info!(issuer = %issuer, services = tokens.len(), "Received join tokens");
        println!("Received join tokens from {issuer:?}");

        let joined = self.join_services(&tokens).await?;
        self.announce_joined(&joined).await?;

        Ok(joined)
    }

    /// Poll token broadcasts until one carries tokens for this node.
    ///
    /// There is no deadline unless `token_wait` sets one.
    async fn await_tokens(
        &self,
    ) -> Result<(String, BTreeMap<ServiceType, String>), ClusterError> {
        let deadline = self.config.token_wait.map(|wait| (wait, Instant::now() + wait));

        loop {
            let records = self
                .directory
                .lookup_records(services::TOKEN, &self.node.name)
                .await
                .map_err(|e| ClusterError::Discovery(format!("{e:#}")))?;

            for (issuer, record) in records {
                let tokens = match TokenSet::from_slice(&record.payload) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::warn!(issuer = %issuer, error = %e, "Ignoring token broadcast");
                        continue;
                    }
                };

                if let Some(mine) = tokens.tokens_for(&self.node.name) {
                    return Ok((issuer, mine.clone()));
                }
            }

            if let Some((wait, deadline)) = deadline {
                if Instant::now() >= deadline {
                    return Err(ClusterError::Discovery(format!(
                        "No join token for {:?} received within {}s",
                        self.node.name,
                        wait.as_secs()
                    )));
                }
            }

            tokio::time::sleep(self.config.reconcile_interval).await;
        }
    }

    /// Join every enabled service that received a token, primary first
    async fn join_services(
        &self,
        tokens: &BTreeMap<ServiceType, String>,
    ) -> Result<Vec<ServiceType>, ClusterError> {
        let mut joined = Vec::new();

        for service in self.registry.bootstrap_order() {
            let service_type = service.service_type();
            let Some(token) = tokens.get(&service_type) else {
                if service_type.is_primary() {
                    return Err(ClusterError::Join {
                        service: service_type,
                        reason: "no token was issued for this node".to_string(),
                    });
                }
                tracing::warn!(service = %service_type, "No token issued for enabled service");
                continue;
            };

            service.join(token).await.map_err(|e| ClusterError::Join {
                service: service_type,
                reason: format!("{e:#}"),
            })?;

            tracing::info!(service = %service_type, "Local service joined");
            println!(" Local {service_type} has joined the cluster");
            joined.push(service_type);
        }

        for service_type in tokens.keys() {
            if self.registry.get(*service_type).is_none() {
                tracing::warn!(service = %service_type, "Ignoring token for service not enabled locally");
            }
        }

        Ok(joined)
    }

    /// Advertise the join long enough for the coordinator to poll it.
    ///
    /// The payload lists the services joined so the issuer records this node
    /// only where it is actually a member.
    async fn announce_joined(&self, joined: &[ServiceType]) -> Result<(), ClusterError> {
        let payload = serde_json::to_vec(joined)?;
        let handle = self
            .directory
            .advertise(services::JOINED, self.advertisement().with_payload(payload))
            .await
            .map_err(|e| ClusterError::Discovery(format!("Failed to announce join: {e:#}")))?;

        tokio::time::sleep(self.config.settle_period).await;

        handle
            .shutdown()
            .await
            .map_err(|e| ClusterError::Broadcast(format!("Failed to stop join announcement: {e:#}")))
    }
}
