// NetMeshBase — a store of replicated mesh objects and its proxies
//
// Objects live in a SwappingMap over an IterableStore; proxies live in the
// ProxyManager. All mutation goes through a Transaction. Incoming XPRISO
// messages arrive through the MessageHandler impl and are applied inside a
// transaction tagged with the proxy they came through.

pub mod builder;
pub mod execute;
pub mod lifecycle;
pub mod mapper;

pub use builder::NetMeshBaseBuilder;
pub use mapper::NetMeshObjectMapper;

use crate::access::NetAccessManager;
use crate::identifier::{NetMeshBaseIdentifier, NetMeshObjectIdentifier, NetMeshObjectIdentifierFactory};
use crate::mesh::NetMeshObject;
use crate::model::ModelBase;
use crate::policy::{PolicyError, ProxyPolicy, ProxyProcessingInstructions, ReplicaContext};
use crate::proxy::{Proxy, ProxyManager};
use crate::store::{StoreError, SwappingMap};
use crate::transport::MessageHandler;
use crate::xpriso::XprisoMessage;
use crate::{now_millis, MeshBaseError};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct NetMeshBase {
    identifier: NetMeshBaseIdentifier,
    id_factory: NetMeshObjectIdentifierFactory,
    model: Arc<dyn ModelBase>,
    access: Arc<dyn NetAccessManager>,
    objects: SwappingMap<NetMeshObjectMapper>,
    proxies: Arc<ProxyManager>,
    writable: bool,
    transaction_timeout: Duration,
    transaction_active: Mutex<bool>,
    transaction_ended: Condvar,
}

impl NetMeshBase {
    pub fn builder(identifier: NetMeshBaseIdentifier) -> NetMeshBaseBuilder {
        NetMeshBaseBuilder::new(identifier)
    }

    pub fn identifier(&self) -> &NetMeshBaseIdentifier {
        &self.identifier
    }

    pub fn identifier_factory(&self) -> &NetMeshObjectIdentifierFactory {
        &self.id_factory
    }

    pub fn model(&self) -> &Arc<dyn ModelBase> {
        &self.model
    }

    pub fn access(&self) -> &Arc<dyn NetAccessManager> {
        &self.access
    }

    pub fn proxy_manager(&self) -> &Arc<ProxyManager> {
        &self.proxies
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn transaction_timeout(&self) -> Duration {
        self.transaction_timeout
    }

    // ========================================================================
    // LOOKUP
    // ========================================================================

    /// The live replica of `id`, loading it from storage if needed.
    pub fn find(&self, id: &NetMeshObjectIdentifier) -> Option<Arc<NetMeshObject>> {
        let object = self.objects.get(id).filter(|o| !o.is_dead())?;
        object.touch_read(now_millis());
        Some(object)
    }

    pub fn find_by_external_form(&self, raw: &str) -> Result<Arc<NetMeshObject>, MeshBaseError> {
        let id = self.id_factory.guess_from_external_form(raw)?;
        self.find(&id).ok_or(MeshBaseError::UnknownObject(id))
    }

    /// Proxies known to this mesh base, ordered by partner.
    pub fn proxies(&self) -> Vec<Arc<Proxy>> {
        let mut proxies = self.proxies.proxies();
        proxies.sort_by(|a, b| a.partner().cmp(b.partner()));
        proxies
    }

    pub fn find_proxy(&self, partner: &NetMeshBaseIdentifier) -> Option<Arc<Proxy>> {
        self.proxies.get(partner)
    }

    // ========================================================================
    // OUTBOUND REPLICATION
    // ========================================================================

    /// Asks `partner` for first replicas of `ids`.
    pub fn obtain_replicas(
        &self,
        partner: &NetMeshBaseIdentifier,
        ids: &[NetMeshObjectIdentifier],
    ) -> Result<(), MeshBaseError> {
        let wanted: Vec<NetMeshObjectIdentifier> = ids.iter().filter(|id| self.find(id).is_none()).cloned().collect();
        if wanted.is_empty() {
            debug!("All {} requested replicas present already", ids.len());
            return Ok(());
        }
        let proxy = self.proxies.obtain_for(partner, &Default::default())?;
        self.run_outbound(&proxy, |policy, proxy| policy.obtain_replicas(&wanted, proxy))
    }

    /// Asks the mesh base that owns `id` for a first replica.
    pub fn obtain_replica(&self, id: &NetMeshObjectIdentifier) -> Result<(), MeshBaseError> {
        self.obtain_replicas(id.mesh_base(), std::slice::from_ref(id))
    }

    /// Asks for the locks of `objects` along their lock paths.
    pub fn try_to_obtain_locks(&self, objects: &[Arc<NetMeshObject>]) -> Result<(), MeshBaseError> {
        for (proxy, group) in group_by(objects, |o| o.proxy_towards_lock()) {
            self.run_outbound(&proxy, |policy, proxy| policy.try_to_obtain_locks(&group, proxy))?;
        }
        Ok(())
    }

    /// Takes the locks of `objects` back without waiting for the holders.
    pub fn force_obtain_locks(&self, objects: &[Arc<NetMeshObject>]) -> Result<(), MeshBaseError> {
        for (proxy, group) in group_by(objects, |o| o.proxy_towards_lock()) {
            self.run_outbound(&proxy, |policy, proxy| policy.force_obtain_locks(&group, proxy))?;
        }
        Ok(())
    }

    /// Hands the locks of `objects` to `partner`.
    pub fn try_to_push_locks(
        &self,
        objects: &[Arc<NetMeshObject>],
        partner: &NetMeshBaseIdentifier,
    ) -> Result<(), MeshBaseError> {
        let proxy = self.proxies.obtain_for(partner, &Default::default())?;
        self.run_outbound(&proxy, |policy, proxy| policy.try_to_push_locks(objects, proxy))
    }

    pub fn try_to_obtain_home(&self, objects: &[Arc<NetMeshObject>]) -> Result<(), MeshBaseError> {
        for (proxy, group) in group_by(objects, |o| o.proxy_towards_home()) {
            self.run_outbound(&proxy, |policy, proxy| policy.try_to_obtain_home(&group, proxy))?;
        }
        Ok(())
    }

    pub fn try_to_push_home(
        &self,
        objects: &[Arc<NetMeshObject>],
        partner: &NetMeshBaseIdentifier,
    ) -> Result<(), MeshBaseError> {
        let proxy = self.proxies.obtain_for(partner, &Default::default())?;
        self.run_outbound(&proxy, |policy, proxy| policy.try_to_push_home(objects, proxy))
    }

    /// Asks the home replicas of `objects` for full copies again.
    pub fn try_resynchronize(&self, objects: &[Arc<NetMeshObject>]) -> Result<(), MeshBaseError> {
        for (proxy, group) in group_by(objects, |o| o.proxy_towards_home()) {
            self.run_outbound(&proxy, |policy, proxy| policy.try_resynchronize(&group, proxy))?;
        }
        Ok(())
    }

    pub fn freshen(&self, objects: &[Arc<NetMeshObject>]) -> Result<(), MeshBaseError> {
        for (proxy, group) in group_by(objects, |o| o.proxy_towards_home()) {
            self.run_outbound(&proxy, |policy, proxy| policy.freshen(&group, proxy))?;
            proxy.schedule_freshen(now_millis());
        }
        Ok(())
    }

    /// Stops replicating `objects` towards `partner`.
    pub fn cancel_replicas(
        &self,
        objects: &[Arc<NetMeshObject>],
        partner: &NetMeshBaseIdentifier,
    ) -> Result<(), MeshBaseError> {
        let proxy = self.proxies.get(partner).ok_or_else(|| MeshBaseError::UnknownPartner(partner.clone()))?;
        let replicated: Vec<Arc<NetMeshObject>> =
            objects.iter().filter(|o| o.replicates_towards(partner)).cloned().collect();
        self.run_outbound(&proxy, |policy, proxy| policy.cancel_replicas(&replicated, proxy))
    }

    /// Freshens every proxy whose periodic freshen is due at `now`.
    ///
    /// Returns the number of proxies that sent a freshen request.
    pub fn freshen_due_replicas(&self, now: i64) -> usize {
        let mut freshened = 0;
        for proxy in self.proxies() {
            if !proxy.freshen_due(now) {
                continue;
            }
            let objects: Vec<Arc<NetMeshObject>> = proxy.homes_across().iter().filter_map(|id| self.find(id)).collect();
            if objects.is_empty() {
                proxy.schedule_freshen(now);
                continue;
            }
            match self.run_outbound(&proxy, |policy, proxy| policy.freshen(&objects, proxy)) {
                Ok(()) => freshened += 1,
                Err(e) => warn!("Freshen towards {} failed: {}", proxy.partner(), e),
            }
            proxy.schedule_freshen(now);
        }
        freshened
    }

    /// Tells `partner` we are gone for good and forgets its proxy.
    pub fn kill_proxy(&self, partner: &NetMeshBaseIdentifier) -> Result<(), MeshBaseError> {
        let proxy = self.proxies.get(partner).ok_or_else(|| MeshBaseError::UnknownPartner(partner.clone()))?;
        let objects: Vec<Arc<NetMeshObject>> =
            self.objects()?.into_iter().filter(|o| o.replicates_towards(partner)).collect();
        let sent = self.run_outbound(&proxy, |policy, proxy| policy.proxy_death(&objects, proxy));
        self.proxies.remove(partner)?;
        info!("Killed proxy towards {} ({} replicas)", partner, objects.len());
        sent
    }

    fn run_outbound<F>(&self, proxy: &Arc<Proxy>, calculate: F) -> Result<(), MeshBaseError>
    where
        F: FnOnce(&ProxyPolicy, &Proxy) -> Result<ProxyProcessingInstructions, PolicyError>,
    {
        let instructions = calculate(proxy.policy(), proxy)?;
        self.execute(instructions, proxy, None)?;
        Ok(())
    }

    // ========================================================================
    // OBJECT TABLE (transaction support)
    // ========================================================================

    pub(crate) fn cache_object(&self, object: &Arc<NetMeshObject>) {
        self.objects.insert_cached(object.identifier().clone(), object);
    }

    pub(crate) fn stage_object(&self, object: &Arc<NetMeshObject>) {
        self.objects.save_upon_commit(object.identifier().clone(), object.clone());
    }

    pub(crate) fn forget_object(&self, id: &NetMeshObjectIdentifier) {
        self.objects.remove_upon_commit(id.clone());
    }

    /// Writes an object now; used outside transactions.
    pub(crate) fn save_object(&self, object: &Arc<NetMeshObject>) {
        if let Err(e) = self.objects.value_updated(object.identifier(), object) {
            warn!("Failed to write {}: {}", object.identifier(), e);
        }
    }

    pub(crate) fn remove_object(&self, id: &NetMeshObjectIdentifier) {
        match self.objects.remove(id) {
            Ok(()) | Err(StoreError::KeyDoesNotExist(_)) => {}
            Err(e) => warn!("Failed to remove {}: {}", id, e),
        }
    }

    /// Sends the committed `changes` to every affected partner except `incoming`.
    pub(crate) fn propagate(
        &self,
        changes: &[crate::transaction::Change],
        incoming: Option<&Arc<Proxy>>,
    ) -> Result<(), PolicyError> {
        let mut partners: BTreeMap<NetMeshBaseIdentifier, Arc<Proxy>> = BTreeMap::new();
        for change in changes {
            for proxy in change.proxies() {
                if incoming.is_some_and(|i| i.partner() == proxy.partner()) {
                    continue;
                }
                partners.entry(proxy.partner().clone()).or_insert(proxy);
            }
        }
        for proxy in partners.values() {
            let instructions = proxy.policy().calculate_for_transaction_committed(changes, proxy, self)?;
            if let Some(message) = instructions.send_via_endpoint {
                if let Err(e) = proxy.transmit(message, instructions.start_communicating) {
                    warn!("Cannot tell {} about committed changes: {}", proxy.partner(), e);
                }
            }
        }
        Ok(())
    }
}

/// Groups `objects` by the proxy `path` picks; objects without one are skipped.
fn group_by(
    objects: &[Arc<NetMeshObject>],
    path: impl Fn(&NetMeshObject) -> Option<Arc<Proxy>>,
) -> Vec<(Arc<Proxy>, Vec<Arc<NetMeshObject>>)> {
    let mut groups: BTreeMap<NetMeshBaseIdentifier, (Arc<Proxy>, Vec<Arc<NetMeshObject>>)> = BTreeMap::new();
    for object in objects {
        match path(object) {
            Some(proxy) => groups
                .entry(proxy.partner().clone())
                .or_insert_with(|| (proxy.clone(), Vec::new()))
                .1
                .push(object.clone()),
            None => debug!("{} is held locally, skipped", object.identifier()),
        }
    }
    groups.into_values().collect()
}

impl ReplicaContext for NetMeshBase {
    fn local_identifier(&self) -> &NetMeshBaseIdentifier {
        &self.identifier
    }

    fn find_replica(&self, id: &NetMeshObjectIdentifier) -> Option<Arc<NetMeshObject>> {
        self.find(id)
    }

    fn access_manager(&self) -> &dyn NetAccessManager {
        self.access.as_ref()
    }

    fn is_writable(&self) -> bool {
        self.writable
    }
}

impl MessageHandler for NetMeshBase {
    fn message_received(&self, from: &NetMeshBaseIdentifier, message: XprisoMessage) {
        let summary = message.summary();
        if let Err(e) = self.process_incoming(from, message) {
            warn!("Failed to process {}: {}", summary, e);
        }
    }
}

impl std::fmt::Debug for NetMeshBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetMeshBase")
            .field("identifier", &self.identifier)
            .field("writable", &self.writable)
            .finish()
    }
}
