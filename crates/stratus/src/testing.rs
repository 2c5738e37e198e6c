//! Test doubles for the discovery directory and service handles.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use stratus_common::{Peer, ServiceType};

use crate::discovery::{Advertisement, Broadcast, Directory, Record};
use crate::services::{AddressInfo, ClusterService, ServiceStatus};

/// Shared record of calls made against fakes, in order
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Service handle that records calls and fails on demand
pub struct FakeService {
    service: ServiceType,
    log: CallLog,
    fail_bootstrap: bool,
    fail_issue_for: Option<String>,
    fail_record_for: Option<String>,
}

impl FakeService {
    pub fn new(service: ServiceType, log: &CallLog) -> Self {
        Self {
            service,
            log: log.clone(),
            fail_bootstrap: false,
            fail_issue_for: None,
            fail_record_for: None,
        }
    }

    pub fn failing_bootstrap(mut self) -> Self {
        self.fail_bootstrap = true;
        self
    }

    pub fn failing_issue_for(mut self, peer: &str) -> Self {
        self.fail_issue_for = Some(peer.to_string());
        self
    }

    pub fn failing_record_for(mut self, peer: &str) -> Self {
        self.fail_record_for = Some(peer.to_string());
        self
    }

    fn record(&self, call: String) {
        self.log.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ClusterService for FakeService {
    fn service_type(&self) -> ServiceType {
        self.service
    }

    fn address_info(&self) -> AddressInfo {
        AddressInfo {
            name: "local".to_string(),
            address: "10.0.0.1".to_string(),
            port: 9443,
        }
    }

    async fn bootstrap(&self) -> Result<()> {
        self.record(format!("bootstrap:{}", self.service));
        if self.fail_bootstrap {
            bail!("daemon not running");
        }
        Ok(())
    }

    async fn issue_token(&self, peer: &str) -> Result<String> {
        self.record(format!("issue:{}:{}", self.service, peer));
        if self.fail_issue_for.as_deref() == Some(peer) {
            bail!("token endpoint unavailable");
        }
        Ok(format!("{}-{}", self.service, peer))
    }

    async fn join(&self, token: &str) -> Result<()> {
        self.record(format!("join:{}:{}", self.service, token));
        Ok(())
    }

    async fn record_member(&self, peer: &Peer) -> Result<()> {
        self.record(format!("member:{}:{}@{}", self.service, peer.name, peer.address));
        if self.fail_record_for.as_deref() == Some(peer.name.as_str()) {
            bail!("membership file is read-only");
        }
        Ok(())
    }

    async fn status(&self) -> Result<ServiceStatus> {
        Ok(ServiceStatus {
            service: self.service,
            bootstrapped: true,
            members: Vec::new(),
        })
    }
}

/// Directory whose lookups replay a script, one response per poll.
///
/// Once a script is down to its last response, that response repeats.
#[derive(Default)]
pub struct ScriptedDirectory {
    scripts: Mutex<HashMap<String, VecDeque<BTreeMap<String, Record>>>>,
    failing: Mutex<HashSet<String>>,
    lookups: Mutex<HashMap<String, usize>>,
    advertised: Mutex<Vec<(String, Advertisement)>>,
    shutdowns: Arc<AtomicUsize>,
}

impl ScriptedDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, service: &str, polls: &[&[(&str, &str)]]) {
        let responses = polls
            .iter()
            .map(|poll| {
                poll.iter()
                    .map(|(name, addr)| {
                        let record = Record {
                            address: addr.to_string(),
                            port: 9443,
                            ..Default::default()
                        };
                        (name.to_string(), record)
                    })
                    .collect()
            })
            .collect();
        self.scripts
            .lock()
            .unwrap()
            .insert(service.to_string(), responses);
    }

    /// Answer every lookup of `service` with one peer carrying `payload`
    pub fn publish(&self, service: &str, name: &str, payload: Vec<u8>) {
        self.publish_after(service, 0, name, payload);
    }

    /// Like `publish`, but the first `empty_polls` lookups find nothing
    pub fn publish_after(&self, service: &str, empty_polls: usize, name: &str, payload: Vec<u8>) {
        let record = Record {
            address: "10.0.0.1".to_string(),
            port: 9443,
            payload,
        };
        let mut responses: VecDeque<_> = std::iter::repeat_with(BTreeMap::new)
            .take(empty_polls)
            .collect();
        responses.push_back(BTreeMap::from([(name.to_string(), record)]));
        self.scripts
            .lock()
            .unwrap()
            .insert(service.to_string(), responses);
    }

    pub fn fail(&self, service: &str) {
        self.failing.lock().unwrap().insert(service.to_string());
    }

    pub fn lookup_count(&self, service: &str) -> usize {
        self.lookups.lock().unwrap().get(service).copied().unwrap_or(0)
    }

    pub fn advertisements(&self) -> Vec<(String, Advertisement)> {
        self.advertised.lock().unwrap().clone()
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Directory for ScriptedDirectory {
    async fn advertise(&self, service: &str, ad: Advertisement) -> Result<Box<dyn Broadcast>> {
        self.advertised
            .lock()
            .unwrap()
            .push((service.to_string(), ad));
        Ok(Box::new(CountingBroadcast {
            shutdowns: self.shutdowns.clone(),
        }))
    }

    async fn lookup_records(
        &self,
        service: &str,
        exclude: &str,
    ) -> Result<BTreeMap<String, Record>> {
        *self
            .lookups
            .lock()
            .unwrap()
            .entry(service.to_string())
            .or_default() += 1;

        if self.failing.lock().unwrap().contains(service) {
            bail!("multicast socket closed");
        }

        let mut scripts = self.scripts.lock().unwrap();
        let response = match scripts.get_mut(service) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => BTreeMap::new(),
        };

        Ok(response
            .into_iter()
            .filter(|(name, _)| name != exclude)
            .collect())
    }
}

struct CountingBroadcast {
    shutdowns: Arc<AtomicUsize>,
}

#[async_trait]
impl Broadcast for CountingBroadcast {
    async fn shutdown(self: Box<Self>) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
