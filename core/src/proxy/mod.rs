// Proxy — the local end of the replication relationship with one partner

pub mod coherence;
pub mod externalized;
pub mod factory;
pub mod manager;
pub mod mapper;

pub use coherence::CoherenceSpecification;
pub use externalized::ExternalizedProxy;
pub use factory::{DefaultProxyFactory, ProxyFactory, ProxyParameters};
pub use manager::ProxyManager;
pub use mapper::ProxyEntryMapper;

use crate::identifier::{NetMeshBaseIdentifier, NetMeshObjectIdentifier};
use crate::policy::{PeerRole, PolicyError, ProxyPolicy};
use crate::store::StoreError;
use crate::transport::{EndpointState, MessageEndpoint, TransportError};
use crate::xpriso::XprisoMessage;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProxyError {
    #[error("Proxy towards {0} is a placeholder and cannot communicate")]
    Placeholder(NetMeshBaseIdentifier),
    #[error("Cannot create a proxy towards the local mesh base {0}")]
    TowardsSelf(NetMeshBaseIdentifier),
    #[error("Invalid coherence specification: {0}")]
    InvalidCoherence(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),
}

/// What a proxy is waiting for from its partner, per object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AwaitingState {
    FirstReplica,
    Lock,
    Home,
    Resync,
    Reclaim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProxyTimes {
    pub(crate) created: i64,
    pub(crate) updated: i64,
    pub(crate) read: i64,
    pub(crate) expires: i64,
    /// When the next freshen is due; -1 if never scheduled.
    pub(crate) next_freshen: i64,
    /// Delay used for the last scheduled freshen; -1 if none.
    pub(crate) freshen_delay: i64,
}

#[derive(Default)]
struct ReplicationState {
    awaiting: BTreeMap<NetMeshObjectIdentifier, AwaitingState>,
    /// Replicas whose lock lies across this proxy.
    lock_paths: BTreeSet<NetMeshObjectIdentifier>,
    /// Replicas whose home lies across this proxy.
    home_paths: BTreeSet<NetMeshObjectIdentifier>,
}

pub struct Proxy {
    local: NetMeshBaseIdentifier,
    partner: NetMeshBaseIdentifier,
    endpoint: Option<Arc<dyn MessageEndpoint>>,
    policy: ProxyPolicy,
    coherence: RwLock<CoherenceSpecification>,
    times: Mutex<ProxyTimes>,
    replication: Mutex<ReplicationState>,
    next_request_id: AtomicI64,
    manager: RwLock<Weak<ProxyManager>>,
}

impl Proxy {
    pub(crate) fn new(
        local: NetMeshBaseIdentifier,
        partner: NetMeshBaseIdentifier,
        endpoint: Option<Arc<dyn MessageEndpoint>>,
        policy: ProxyPolicy,
        coherence: CoherenceSpecification,
        now: i64,
    ) -> Self {
        Self {
            local,
            partner,
            endpoint,
            policy,
            coherence: RwLock::new(coherence),
            times: Mutex::new(ProxyTimes {
                created: now,
                updated: now,
                read: now,
                expires: -1,
                next_freshen: -1,
                freshen_delay: -1,
            }),
            replication: Mutex::new(ReplicationState::default()),
            next_request_id: AtomicI64::new(1),
            manager: RwLock::new(Weak::new()),
        }
    }

    pub(crate) fn restore(
        externalized: ExternalizedProxy,
        endpoint: Option<Arc<dyn MessageEndpoint>>,
        policy: ProxyPolicy,
    ) -> Self {
        Self {
            local: externalized.local,
            partner: externalized.partner,
            endpoint,
            policy,
            coherence: RwLock::new(externalized.coherence),
            times: Mutex::new(ProxyTimes {
                created: externalized.time_created,
                updated: externalized.time_updated,
                read: externalized.time_read,
                expires: externalized.time_expires,
                next_freshen: externalized.next_freshen,
                freshen_delay: externalized.freshen_delay,
            }),
            replication: Mutex::new(ReplicationState {
                awaiting: externalized.awaiting.into_iter().collect(),
                lock_paths: externalized.locks_towards_partner.into_iter().collect(),
                home_paths: externalized.homes_towards_partner.into_iter().collect(),
            }),
            next_request_id: AtomicI64::new(externalized.next_request_id.max(1)),
            manager: RwLock::new(Weak::new()),
        }
    }

    pub fn local_identifier(&self) -> &NetMeshBaseIdentifier {
        &self.local
    }

    pub fn partner(&self) -> &NetMeshBaseIdentifier {
        &self.partner
    }

    pub fn endpoint(&self) -> Option<&Arc<dyn MessageEndpoint>> {
        self.endpoint.as_ref()
    }

    pub fn policy(&self) -> &ProxyPolicy {
        &self.policy
    }

    pub fn role(&self) -> PeerRole {
        self.policy.role()
    }

    pub fn is_placeholder(&self) -> bool {
        self.endpoint.is_none()
    }

    pub fn coherence(&self) -> CoherenceSpecification {
        *self.coherence.read()
    }

    pub fn set_coherence(&self, coherence: CoherenceSpecification) {
        *self.coherence.write() = coherence;
    }

    // ========================================================================
    // TIMES
    // ========================================================================

    pub fn time_created(&self) -> i64 {
        self.times.lock().created
    }

    pub fn time_updated(&self) -> i64 {
        self.times.lock().updated
    }

    pub fn time_read(&self) -> i64 {
        self.times.lock().read
    }

    pub fn time_expires(&self) -> i64 {
        self.times.lock().expires
    }

    pub(crate) fn touch_updated(&self, now: i64) {
        self.times.lock().updated = now;
    }

    pub(crate) fn touch_read(&self, now: i64) {
        self.times.lock().read = now;
    }

    /// Is a freshen due at `now`? Unscheduled proxies are never due.
    pub fn freshen_due(&self, now: i64) -> bool {
        let times = self.times.lock();
        times.next_freshen >= 0 && times.next_freshen <= now
    }

    /// Schedules the next freshen according to the coherence specification.
    /// Returns the scheduled time, or `None` if the proxy does not freshen.
    pub(crate) fn schedule_freshen(&self, now: i64) -> Option<i64> {
        let coherence = self.coherence();
        let mut times = self.times.lock();
        let previous = (times.freshen_delay >= 0).then_some(times.freshen_delay);
        let changed = times.next_freshen >= 0 && times.updated > times.next_freshen - times.freshen_delay.max(0);
        match coherence.next_freshen_delay(previous, changed) {
            Some(delay) => {
                times.freshen_delay = delay;
                times.next_freshen = now + delay;
                Some(times.next_freshen)
            }
            None => {
                times.freshen_delay = -1;
                times.next_freshen = -1;
                None
            }
        }
    }

    pub(crate) fn times(&self) -> ProxyTimes {
        *self.times.lock()
    }

    // ========================================================================
    // REPLICATION BOOKKEEPING
    // ========================================================================

    pub fn obtain_request_id(&self) -> i64 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn awaiting(&self, object: &NetMeshObjectIdentifier) -> Option<AwaitingState> {
        self.replication.lock().awaiting.get(object).copied()
    }

    pub fn awaiting_objects(&self) -> Vec<(NetMeshObjectIdentifier, AwaitingState)> {
        self.replication
            .lock()
            .awaiting
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub(crate) fn set_awaiting(&self, object: NetMeshObjectIdentifier, state: AwaitingState) {
        self.replication.lock().awaiting.insert(object, state);
    }

    pub(crate) fn clear_awaiting(&self, object: &NetMeshObjectIdentifier) -> Option<AwaitingState> {
        self.replication.lock().awaiting.remove(object)
    }

    pub(crate) fn note_lock_path(&self, object: &NetMeshObjectIdentifier) {
        self.replication.lock().lock_paths.insert(object.clone());
    }

    pub(crate) fn forget_lock_path(&self, object: &NetMeshObjectIdentifier) {
        self.replication.lock().lock_paths.remove(object);
    }

    pub(crate) fn note_home_path(&self, object: &NetMeshObjectIdentifier) {
        self.replication.lock().home_paths.insert(object.clone());
    }

    pub(crate) fn forget_home_path(&self, object: &NetMeshObjectIdentifier) {
        self.replication.lock().home_paths.remove(object);
    }

    /// Does the lock of `object` lie across this proxy?
    pub fn partner_holds_lock(&self, object: &NetMeshObjectIdentifier) -> bool {
        self.replication.lock().lock_paths.contains(object)
    }

    pub fn partner_holds_home(&self, object: &NetMeshObjectIdentifier) -> bool {
        self.replication.lock().home_paths.contains(object)
    }

    /// True if the lock of at least one replica lies across this proxy.
    pub fn lock_held(&self) -> bool {
        !self.replication.lock().lock_paths.is_empty()
    }

    pub fn home_held(&self) -> bool {
        !self.replication.lock().home_paths.is_empty()
    }

    /// Replicas whose home lies across this proxy; the ones a freshen asks about.
    pub fn homes_across(&self) -> Vec<NetMeshObjectIdentifier> {
        self.replication.lock().home_paths.iter().cloned().collect()
    }

    // ========================================================================
    // MANAGER BACK-REFERENCE
    // ========================================================================

    pub(crate) fn set_manager(&self, manager: Weak<ProxyManager>) {
        *self.manager.write() = manager;
    }

    pub fn manager(&self) -> Option<Arc<ProxyManager>> {
        self.manager.read().upgrade()
    }

    /// Tells the owning manager this proxy must be written back.
    pub fn notify_updated(self: &Arc<Self>) {
        match self.manager() {
            Some(manager) => manager.proxy_updated(self),
            None => debug!("Proxy towards {} has no manager, not persisted", self.partner),
        }
    }

    // ========================================================================
    // COMMUNICATION
    // ========================================================================

    fn require_endpoint(&self) -> Result<&Arc<dyn MessageEndpoint>, ProxyError> {
        self.endpoint
            .as_ref()
            .ok_or_else(|| ProxyError::Placeholder(self.partner.clone()))
    }

    /// Hands `message` to the endpoint, starting communication if asked.
    pub fn transmit(&self, message: XprisoMessage, start_communicating: bool) -> Result<(), ProxyError> {
        let endpoint = self.require_endpoint()?;
        debug!("Out {}", message.summary());
        endpoint.send(message)?;
        if start_communicating && !endpoint.is_communicating() {
            endpoint.start_communicating()?;
        }
        Ok(())
    }

    pub fn start_communicating(&self) -> Result<(), ProxyError> {
        Ok(self.require_endpoint()?.start_communicating()?)
    }

    pub fn stop_communicating(&self) {
        if let Some(endpoint) = &self.endpoint {
            endpoint.stop_communicating();
        }
    }

    pub fn is_communicating(&self) -> bool {
        self.endpoint.as_ref().map(|e| e.is_communicating()).unwrap_or(false)
    }

    /// Endpoint bookkeeping for an arrived message.
    pub(crate) fn message_received(&self, message: &XprisoMessage) {
        debug!("In {}", message.summary());
        if let Some(endpoint) = &self.endpoint {
            endpoint.message_received(message);
        }
    }

    pub fn as_externalized(&self) -> ExternalizedProxy {
        let times = self.times();
        let replication = self.replication.lock();
        ExternalizedProxy {
            local: self.local.clone(),
            partner: self.partner.clone(),
            role: self.policy.role(),
            time_created: times.created,
            time_updated: times.updated,
            time_read: times.read,
            time_expires: times.expires,
            next_freshen: times.next_freshen,
            freshen_delay: times.freshen_delay,
            coherence: self.coherence(),
            is_placeholder: self.is_placeholder(),
            lock_held: !replication.lock_paths.is_empty(),
            home_held: !replication.home_paths.is_empty(),
            locks_towards_partner: replication.lock_paths.iter().cloned().collect(),
            homes_towards_partner: replication.home_paths.iter().cloned().collect(),
            awaiting: replication.awaiting.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            next_request_id: self.next_request_id.load(Ordering::SeqCst),
            endpoint: self.endpoint.as_ref().map(|e| e.state()).unwrap_or_else(EndpointState::default),
        }
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.local == other.local && self.partner == other.partner
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("local", &self.local)
            .field("partner", &self.partner)
            .field("role", &self.policy.role())
            .field("placeholder", &self.is_placeholder())
            .finish()
    }
}
