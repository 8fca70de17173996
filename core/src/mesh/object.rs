// NetMeshObject — one replica of a graph node
//
// All mutable state sits behind the object's own mutex, so edits to one object
// serialize while edits to different objects proceed in parallel. Mutation
// primitives are crate-private; applications mutate through a Transaction.

use super::externalized::{ExternalizedNeighbor, ExternalizedNetMeshObject};
use super::MeshObjectError;
use crate::identifier::{NetMeshBaseIdentifier, NetMeshObjectIdentifier};
use crate::model::{EntityTypeId, ModelBase, PropertyTypeId, PropertyValue, RoleTypeId};
use crate::proxy::Proxy;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

/// A relationship to one neighbor, and the proxies through which it was learned.
///
/// No proxies means the relationship is purely local.
#[derive(Clone)]
pub struct Neighbor {
    pub identifier: NetMeshObjectIdentifier,
    pub role_types: BTreeSet<RoleTypeId>,
    pub proxies: Vec<Arc<Proxy>>,
}

impl Neighbor {
    pub fn proxy_partners(&self) -> Vec<NetMeshBaseIdentifier> {
        self.proxies.iter().map(|p| p.partner().clone()).collect()
    }

    fn learn_via(&mut self, via: Option<&Arc<Proxy>>) {
        if let Some(via) = via {
            if !self.proxies.iter().any(|p| p.partner() == via.partner()) {
                self.proxies.push(via.clone());
            }
        }
    }
}

pub(crate) struct ObjectState {
    pub(crate) time_updated: i64,
    pub(crate) time_read: i64,
    pub(crate) time_expires: i64,
    pub(crate) types: BTreeSet<EntityTypeId>,
    pub(crate) properties: BTreeMap<PropertyTypeId, PropertyValue>,
    pub(crate) neighbors: Vec<Neighbor>,
    pub(crate) equivalents: BTreeSet<NetMeshObjectIdentifier>,
    pub(crate) proxies: Vec<Arc<Proxy>>,
    /// `None`: this replica is the home replica.
    pub(crate) proxy_towards_home: Option<Arc<Proxy>>,
    /// `None`: this replica holds the lock.
    pub(crate) proxy_towards_lock: Option<Arc<Proxy>>,
    pub(crate) will_give_up_lock: bool,
    pub(crate) will_give_up_home: bool,
    pub(crate) dead: bool,
}

impl ObjectState {
    fn neighbor_index(&self, neighbor: &NetMeshObjectIdentifier) -> Option<usize> {
        self.neighbors.iter().position(|n| &n.identifier == neighbor)
    }

    fn proxy_index(&self, partner: &NetMeshBaseIdentifier) -> Option<usize> {
        self.proxies.iter().position(|p| p.partner() == partner)
    }
}

pub struct NetMeshObject {
    identifier: NetMeshObjectIdentifier,
    time_created: i64,
    state: Mutex<ObjectState>,
}

impl NetMeshObject {
    /// A fresh replica that is home, holds the lock and replicates nowhere.
    pub(crate) fn new_local(identifier: NetMeshObjectIdentifier, now: i64) -> Self {
        Self {
            identifier,
            time_created: now,
            state: Mutex::new(ObjectState {
                time_updated: now,
                time_read: now,
                time_expires: -1,
                types: BTreeSet::new(),
                properties: BTreeMap::new(),
                neighbors: Vec::new(),
                equivalents: BTreeSet::new(),
                proxies: Vec::new(),
                proxy_towards_home: None,
                proxy_towards_lock: None,
                will_give_up_lock: true,
                will_give_up_home: false,
                dead: false,
            }),
        }
    }

    /// Rebuilds a replica from its externalized form.
    ///
    /// Types unknown to `model` and properties no remaining type declares are
    /// dropped; missing mandatory properties get their default. `resolve` maps
    /// stored proxy partners to live proxies; unresolvable partners are dropped.
    pub(crate) fn restore(
        externalized: &ExternalizedNetMeshObject,
        model: &dyn ModelBase,
        resolve: impl Fn(&NetMeshBaseIdentifier) -> Option<Arc<Proxy>>,
    ) -> Self {
        let (types, properties) = reattach_types(externalized, model);

        let resolved: Vec<Option<Arc<Proxy>>> = externalized.proxies.iter().map(&resolve).collect();
        for (partner, proxy) in externalized.proxies.iter().zip(&resolved) {
            if proxy.is_none() {
                warn!("Dropping unknown proxy {} from {}", partner, externalized.identifier);
            }
        }
        let pick = |index: Option<usize>| index.and_then(|i| resolved.get(i).cloned().flatten());

        let neighbors = externalized
            .neighbors
            .iter()
            .map(|n| Neighbor {
                identifier: n.identifier.clone(),
                role_types: n.role_types.iter().cloned().collect(),
                proxies: n.proxies.iter().filter_map(&resolve).collect(),
            })
            .collect();

        Self {
            identifier: externalized.identifier.clone(),
            time_created: externalized.time_created,
            state: Mutex::new(ObjectState {
                time_updated: externalized.time_updated,
                time_read: externalized.time_read,
                time_expires: externalized.time_expires,
                types,
                properties,
                neighbors,
                equivalents: externalized.equivalents.iter().cloned().collect(),
                proxy_towards_home: pick(externalized.proxy_towards_home),
                proxy_towards_lock: pick(externalized.proxy_towards_lock),
                proxies: resolved.into_iter().flatten().collect(),
                will_give_up_lock: externalized.will_give_up_lock,
                will_give_up_home: externalized.will_give_up_home,
                dead: false,
            }),
        }
    }

    /// A new local replica of a remote object that arrived through `via`.
    pub(crate) fn ripple(
        externalized: &ExternalizedNetMeshObject,
        model: &dyn ModelBase,
        via: &Arc<Proxy>,
        holds_lock: bool,
        holds_home: bool,
        now: i64,
    ) -> Self {
        let (types, properties) = reattach_types(externalized, model);
        let neighbors = externalized
            .neighbors
            .iter()
            .map(|n| Neighbor {
                identifier: n.identifier.clone(),
                role_types: n.role_types.iter().cloned().collect(),
                proxies: vec![via.clone()],
            })
            .collect();

        if !holds_lock {
            via.note_lock_path(&externalized.identifier);
        }
        if !holds_home {
            via.note_home_path(&externalized.identifier);
        }

        Self {
            identifier: externalized.identifier.clone(),
            time_created: externalized.time_created,
            state: Mutex::new(ObjectState {
                time_updated: externalized.time_updated,
                time_read: now,
                time_expires: externalized.time_expires,
                types,
                properties,
                neighbors,
                equivalents: externalized.equivalents.iter().cloned().collect(),
                proxies: vec![via.clone()],
                proxy_towards_home: (!holds_home).then(|| via.clone()),
                proxy_towards_lock: (!holds_lock).then(|| via.clone()),
                will_give_up_lock: externalized.will_give_up_lock,
                will_give_up_home: externalized.will_give_up_home,
                dead: false,
            }),
        }
    }

    // ========================================================================
    // READ ACCESS
    // ========================================================================

    pub fn identifier(&self) -> &NetMeshObjectIdentifier {
        &self.identifier
    }

    pub fn is_home_object(&self) -> bool {
        self.identifier.is_home()
    }

    pub fn time_created(&self) -> i64 {
        self.time_created
    }

    pub fn time_updated(&self) -> i64 {
        self.state.lock().time_updated
    }

    pub fn time_read(&self) -> i64 {
        self.state.lock().time_read
    }

    pub fn time_expires(&self) -> i64 {
        self.state.lock().time_expires
    }

    pub fn is_dead(&self) -> bool {
        self.state.lock().dead
    }

    pub fn entity_types(&self) -> Vec<EntityTypeId> {
        self.state.lock().types.iter().cloned().collect()
    }

    pub fn is_blessed_by(&self, entity_type: &EntityTypeId) -> bool {
        self.state.lock().types.contains(entity_type)
    }

    pub fn property_value(&self, property: &PropertyTypeId) -> Option<PropertyValue> {
        self.state.lock().properties.get(property).cloned()
    }

    pub fn properties(&self) -> BTreeMap<PropertyTypeId, PropertyValue> {
        self.state.lock().properties.clone()
    }

    pub fn neighbor_identifiers(&self) -> Vec<NetMeshObjectIdentifier> {
        self.state.lock().neighbors.iter().map(|n| n.identifier.clone()).collect()
    }

    pub fn neighbors(&self) -> Vec<Neighbor> {
        self.state.lock().neighbors.clone()
    }

    pub fn is_related_to(&self, neighbor: &NetMeshObjectIdentifier) -> bool {
        self.state.lock().neighbor_index(neighbor).is_some()
    }

    pub fn role_types(&self, neighbor: &NetMeshObjectIdentifier) -> Result<BTreeSet<RoleTypeId>, MeshObjectError> {
        let state = self.state.lock();
        match state.neighbor_index(neighbor) {
            Some(i) => Ok(state.neighbors[i].role_types.clone()),
            None => Err(self.not_related(neighbor)),
        }
    }

    /// Partners through which each relationship was learned, in neighbor order.
    pub fn relationship_proxies(&self) -> Vec<Vec<NetMeshBaseIdentifier>> {
        self.state.lock().neighbors.iter().map(Neighbor::proxy_partners).collect()
    }

    pub fn relationship_proxies_for(
        &self,
        neighbor: &NetMeshObjectIdentifier,
    ) -> Result<Vec<Arc<Proxy>>, MeshObjectError> {
        let state = self.state.lock();
        match state.neighbor_index(neighbor) {
            Some(i) => Ok(state.neighbors[i].proxies.clone()),
            None => Err(self.not_related(neighbor)),
        }
    }

    /// Neighbors that `partner` told us about.
    pub fn neighbor_identifiers_according_to(&self, partner: &NetMeshBaseIdentifier) -> Vec<NetMeshObjectIdentifier> {
        self.state
            .lock()
            .neighbors
            .iter()
            .filter(|n| n.proxies.iter().any(|p| p.partner() == partner))
            .map(|n| n.identifier.clone())
            .collect()
    }

    pub fn equivalents(&self) -> Vec<NetMeshObjectIdentifier> {
        self.state.lock().equivalents.iter().cloned().collect()
    }

    pub fn proxies(&self) -> Vec<Arc<Proxy>> {
        self.state.lock().proxies.clone()
    }

    pub fn proxy_partners(&self) -> Vec<NetMeshBaseIdentifier> {
        self.state.lock().proxies.iter().map(|p| p.partner().clone()).collect()
    }

    pub fn find_proxy_towards(&self, partner: &NetMeshBaseIdentifier) -> Option<Arc<Proxy>> {
        let state = self.state.lock();
        state.proxy_index(partner).map(|i| state.proxies[i].clone())
    }

    pub fn replicates_towards(&self, partner: &NetMeshBaseIdentifier) -> bool {
        self.state.lock().proxy_index(partner).is_some()
    }

    pub fn proxy_towards_lock(&self) -> Option<Arc<Proxy>> {
        self.state.lock().proxy_towards_lock.clone()
    }

    pub fn proxy_towards_home(&self) -> Option<Arc<Proxy>> {
        self.state.lock().proxy_towards_home.clone()
    }

    pub fn has_lock(&self) -> bool {
        self.state.lock().proxy_towards_lock.is_none()
    }

    pub fn is_home_replica(&self) -> bool {
        self.state.lock().proxy_towards_home.is_none()
    }

    /// Is the lock held by whoever sits behind `partner`?
    pub fn lock_is_towards(&self, partner: &NetMeshBaseIdentifier) -> bool {
        matches!(&self.state.lock().proxy_towards_lock, Some(p) if p.partner() == partner)
    }

    pub fn home_is_towards(&self, partner: &NetMeshBaseIdentifier) -> bool {
        matches!(&self.state.lock().proxy_towards_home, Some(p) if p.partner() == partner)
    }

    pub fn will_give_up_lock(&self) -> bool {
        self.state.lock().will_give_up_lock
    }

    pub fn will_give_up_home(&self) -> bool {
        self.state.lock().will_give_up_home
    }

    /// Externalized form. Without `capture_proxies` the replication bookkeeping is
    /// left out, which is the form conveyed to peers.
    pub fn as_externalized(&self, capture_proxies: bool) -> ExternalizedNetMeshObject {
        let state = self.state.lock();
        let partners: Vec<NetMeshBaseIdentifier> = state.proxies.iter().map(|p| p.partner().clone()).collect();
        let index_of = |proxy: &Option<Arc<Proxy>>| {
            proxy
                .as_ref()
                .and_then(|p| partners.iter().position(|partner| partner == p.partner()))
        };

        ExternalizedNetMeshObject {
            identifier: self.identifier.clone(),
            time_created: self.time_created,
            time_updated: state.time_updated,
            time_read: state.time_read,
            time_expires: state.time_expires,
            entity_types: state.types.iter().cloned().collect(),
            properties: state.properties.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            neighbors: state
                .neighbors
                .iter()
                .map(|n| ExternalizedNeighbor {
                    identifier: n.identifier.clone(),
                    role_types: n.role_types.iter().cloned().collect(),
                    proxies: if capture_proxies { n.proxy_partners() } else { Vec::new() },
                })
                .collect(),
            equivalents: state.equivalents.iter().cloned().collect(),
            proxy_towards_home: if capture_proxies { index_of(&state.proxy_towards_home) } else { None },
            proxy_towards_lock: if capture_proxies { index_of(&state.proxy_towards_lock) } else { None },
            proxies: if capture_proxies { partners.clone() } else { Vec::new() },
            will_give_up_lock: state.will_give_up_lock,
            will_give_up_home: state.will_give_up_home,
        }
    }

    fn not_related(&self, neighbor: &NetMeshObjectIdentifier) -> MeshObjectError {
        MeshObjectError::NotRelated {
            object: self.identifier.clone(),
            neighbor: neighbor.clone(),
        }
    }

    // ========================================================================
    // NEIGHBOR MANAGEMENT
    // ========================================================================

    /// Adds a relationship, optionally recording the proxy it was learned through.
    pub(crate) fn append_neighbor(
        &self,
        neighbor: &NetMeshObjectIdentifier,
        role_types: &[RoleTypeId],
        via: Option<&Arc<Proxy>>,
    ) -> Result<(), MeshObjectError> {
        let mut state = self.state.lock();
        if state.neighbor_index(neighbor).is_some() {
            return Err(MeshObjectError::RelatedAlready {
                object: self.identifier.clone(),
                neighbor: neighbor.clone(),
            });
        }
        let mut entry = Neighbor {
            identifier: neighbor.clone(),
            role_types: role_types.iter().cloned().collect(),
            proxies: Vec::new(),
        };
        entry.learn_via(via);
        state.neighbors.push(entry);
        Ok(())
    }

    pub(crate) fn restore_neighbor(&self, neighbor: Neighbor) {
        let mut state = self.state.lock();
        match state.neighbor_index(&neighbor.identifier) {
            Some(i) => state.neighbors[i] = neighbor,
            None => state.neighbors.push(neighbor),
        }
    }

    pub(crate) fn remove_neighbor(&self, neighbor: &NetMeshObjectIdentifier) -> Result<Neighbor, MeshObjectError> {
        let mut state = self.state.lock();
        match state.neighbor_index(neighbor) {
            Some(i) => Ok(state.neighbors.remove(i)),
            None => Err(self.not_related(neighbor)),
        }
    }

    /// Adds role types to an existing relationship; returns the ones that were new.
    ///
    /// A role type may only be added through a proxy if `via` is given, in which
    /// case the proxy is recorded as a source of the relationship even if all
    /// roles were known.
    pub(crate) fn append_role_types(
        &self,
        neighbor: &NetMeshObjectIdentifier,
        role_types: &[RoleTypeId],
        via: Option<&Arc<Proxy>>,
    ) -> Result<Vec<RoleTypeId>, MeshObjectError> {
        let mut state = self.state.lock();
        let Some(i) = state.neighbor_index(neighbor) else {
            return Err(self.not_related(neighbor));
        };
        let entry = &mut state.neighbors[i];
        if via.is_none() {
            if let Some(role) = role_types.iter().find(|r| entry.role_types.contains(*r)) {
                return Err(MeshObjectError::RoleTypeBlessedAlready {
                    object: self.identifier.clone(),
                    neighbor: neighbor.clone(),
                    role: role.clone(),
                });
            }
        }
        let added: Vec<RoleTypeId> = role_types
            .iter()
            .filter(|r| entry.role_types.insert((*r).clone()))
            .cloned()
            .collect();
        entry.learn_via(via);
        Ok(added)
    }

    /// Removes role types; returns the ones that were present.
    pub(crate) fn remove_role_types(
        &self,
        neighbor: &NetMeshObjectIdentifier,
        role_types: &[RoleTypeId],
        strict: bool,
    ) -> Result<Vec<RoleTypeId>, MeshObjectError> {
        let mut state = self.state.lock();
        let Some(i) = state.neighbor_index(neighbor) else {
            return Err(self.not_related(neighbor));
        };
        let entry = &mut state.neighbors[i];
        if strict {
            if let Some(role) = role_types.iter().find(|r| !entry.role_types.contains(*r)) {
                return Err(MeshObjectError::RoleTypeNotBlessed {
                    object: self.identifier.clone(),
                    neighbor: neighbor.clone(),
                    role: role.clone(),
                });
            }
        }
        Ok(role_types.iter().filter(|r| entry.role_types.remove(*r)).cloned().collect())
    }

    // ========================================================================
    // CONTENT PRIMITIVES
    // ========================================================================

    /// Adds entity types; returns the ones that were new.
    pub(crate) fn insert_types(&self, types: &[EntityTypeId]) -> Vec<EntityTypeId> {
        let mut state = self.state.lock();
        types.iter().filter(|t| state.types.insert((*t).clone())).cloned().collect()
    }

    /// Removes entity types; returns the ones that were present.
    pub(crate) fn remove_types(&self, types: &[EntityTypeId]) -> Vec<EntityTypeId> {
        let mut state = self.state.lock();
        types.iter().filter(|t| state.types.remove(*t)).cloned().collect()
    }

    /// Sets (or with `None` removes) a property value; returns the previous value.
    pub(crate) fn put_property(&self, property: &PropertyTypeId, value: Option<PropertyValue>) -> Option<PropertyValue> {
        let mut state = self.state.lock();
        match value {
            Some(value) => state.properties.insert(property.clone(), value),
            None => state.properties.remove(property),
        }
    }

    pub(crate) fn insert_equivalents(&self, others: &[NetMeshObjectIdentifier]) -> Vec<NetMeshObjectIdentifier> {
        let mut state = self.state.lock();
        others
            .iter()
            .filter(|o| **o != self.identifier && state.equivalents.insert((*o).clone()))
            .cloned()
            .collect()
    }

    pub(crate) fn remove_equivalents(&self, others: &[NetMeshObjectIdentifier]) -> Vec<NetMeshObjectIdentifier> {
        let mut state = self.state.lock();
        others.iter().filter(|o| state.equivalents.remove(*o)).cloned().collect()
    }

    pub(crate) fn touch_updated(&self, now: i64) {
        self.state.lock().time_updated = now;
    }

    pub(crate) fn touch_read(&self, now: i64) {
        self.state.lock().time_read = now;
    }

    pub(crate) fn set_dead(&self, dead: bool) {
        self.state.lock().dead = dead;
    }

    /// Replaces content with a fresher copy from the replica behind `via`.
    pub(crate) fn resynchronize(&self, externalized: &ExternalizedNetMeshObject, model: &dyn ModelBase, via: &Arc<Proxy>, now: i64) {
        let (types, properties) = reattach_types(externalized, model);
        let mut state = self.state.lock();
        let previous: BTreeMap<NetMeshObjectIdentifier, Neighbor> = state
            .neighbors
            .drain(..)
            .map(|n| (n.identifier.clone(), n))
            .collect();
        state.neighbors = externalized
            .neighbors
            .iter()
            .map(|n| {
                let mut entry = Neighbor {
                    identifier: n.identifier.clone(),
                    role_types: n.role_types.iter().cloned().collect(),
                    proxies: previous.get(&n.identifier).map(|p| p.proxies.clone()).unwrap_or_default(),
                };
                entry.learn_via(Some(via));
                entry
            })
            .collect();
        state.types = types;
        state.properties = properties;
        state.equivalents = externalized.equivalents.iter().cloned().collect();
        state.time_updated = externalized.time_updated;
        state.time_expires = externalized.time_expires;
        state.time_read = now;
    }

    // ========================================================================
    // REPLICATION PRIMITIVES
    // ========================================================================

    /// Records that a replica exists behind `proxy`; returns `false` if known.
    pub(crate) fn register_replication_towards(&self, proxy: &Arc<Proxy>) -> bool {
        let mut state = self.state.lock();
        if state.proxy_index(proxy.partner()).is_some() {
            return false;
        }
        state.proxies.push(proxy.clone());
        true
    }

    /// Forgets the replica behind `partner`. A lock or home that still pointed
    /// there falls back to this replica.
    pub(crate) fn unregister_replication_towards(&self, partner: &NetMeshBaseIdentifier) -> bool {
        let mut state = self.state.lock();
        let Some(i) = state.proxy_index(partner) else {
            return false;
        };
        let proxy = state.proxies.remove(i);
        if matches!(&state.proxy_towards_lock, Some(p) if p.partner() == partner) {
            warn!("{} lost its lock path towards {}, reclaiming", self.identifier, partner);
            proxy.forget_lock_path(&self.identifier);
            state.proxy_towards_lock = None;
        }
        if matches!(&state.proxy_towards_home, Some(p) if p.partner() == partner) {
            warn!("{} lost its home path towards {}, reclaiming", self.identifier, partner);
            proxy.forget_home_path(&self.identifier);
            state.proxy_towards_home = None;
        }
        true
    }

    /// Points the lock at `towards` (`None`: this replica holds it).
    pub(crate) fn set_proxy_towards_lock(&self, towards: Option<&Arc<Proxy>>) {
        let mut state = self.state.lock();
        if let Some(old) = state.proxy_towards_lock.take() {
            old.forget_lock_path(&self.identifier);
        }
        if let Some(new) = towards {
            if state.proxy_index(new.partner()).is_none() {
                state.proxies.push(new.clone());
            }
            new.note_lock_path(&self.identifier);
            state.proxy_towards_lock = Some(new.clone());
        }
    }

    /// Points the home replica at `towards` (`None`: this replica is home).
    pub(crate) fn set_proxy_towards_home(&self, towards: Option<&Arc<Proxy>>) {
        let mut state = self.state.lock();
        if let Some(old) = state.proxy_towards_home.take() {
            old.forget_home_path(&self.identifier);
        }
        if let Some(new) = towards {
            if state.proxy_index(new.partner()).is_none() {
                state.proxies.push(new.clone());
            }
            new.note_home_path(&self.identifier);
            state.proxy_towards_home = Some(new.clone());
        }
    }

    pub(crate) fn set_will_give_up_lock(&self, value: bool) {
        self.state.lock().will_give_up_lock = value;
    }

    pub(crate) fn set_will_give_up_home(&self, value: bool) {
        self.state.lock().will_give_up_home = value;
    }

    /// Drops all replication bookkeeping; used when the local replica is purged.
    pub(crate) fn release_proxies(&self) {
        let mut state = self.state.lock();
        if let Some(p) = state.proxy_towards_lock.take() {
            p.forget_lock_path(&self.identifier);
        }
        if let Some(p) = state.proxy_towards_home.take() {
            p.forget_home_path(&self.identifier);
        }
        state.proxies.clear();
    }
}

/// Re-attaches stored type and property ids to the current model.
fn reattach_types(
    externalized: &ExternalizedNetMeshObject,
    model: &dyn ModelBase,
) -> (BTreeSet<EntityTypeId>, BTreeMap<PropertyTypeId, PropertyValue>) {
    let mut entity_types = Vec::new();
    for id in &externalized.entity_types {
        match model.find_entity_type(id) {
            Some(found) => entity_types.push(found),
            None => warn!("Dropping unknown entity type {} from {}", id, externalized.identifier),
        }
    }

    let mut properties = BTreeMap::new();
    for (property, value) in &externalized.properties {
        if entity_types.iter().any(|t| t.declares(property)) {
            properties.insert(property.clone(), value.clone());
        } else {
            warn!("Dropping unknown property {} from {}", property, externalized.identifier);
        }
    }
    for entity_type in &entity_types {
        for mandatory in entity_type.mandatory_properties() {
            if !properties.contains_key(&mandatory.id) {
                warn!(
                    "Filling missing property {} of {} with its default",
                    mandatory.id, externalized.identifier
                );
                properties.insert(mandatory.id.clone(), mandatory.default_value.clone());
            }
        }
    }

    (entity_types.into_iter().map(|t| t.id.clone()).collect(), properties)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityType, SimpleModelBase};
    use crate::proxy::testing::placeholder_proxy;

    fn id(local: &str) -> NetMeshObjectIdentifier {
        let base = NetMeshBaseIdentifier::from_external_form("http://here.example/").unwrap();
        NetMeshObjectIdentifier::new(base, local).unwrap()
    }

    fn partner(host: &str) -> NetMeshBaseIdentifier {
        NetMeshBaseIdentifier::from_external_form(&format!("http://{host}.example/")).unwrap()
    }

    fn role(name: &str) -> RoleTypeId {
        RoleTypeId::new(name)
    }

    #[test]
    fn test_append_and_remove_neighbor() {
        let obj = NetMeshObject::new_local(id("a"), 1);
        obj.append_neighbor(&id("b"), &[role("r/S")], None).unwrap();
        assert!(matches!(
            obj.append_neighbor(&id("b"), &[], None),
            Err(MeshObjectError::RelatedAlready { .. })
        ));
        assert_eq!(obj.neighbor_identifiers(), vec![id("b")]);
        assert_eq!(obj.relationship_proxies(), vec![Vec::<NetMeshBaseIdentifier>::new()]);

        let removed = obj.remove_neighbor(&id("b")).unwrap();
        assert!(removed.role_types.contains(&role("r/S")));
        assert!(matches!(obj.remove_neighbor(&id("b")), Err(MeshObjectError::NotRelated { .. })));
    }

    #[test]
    fn test_role_types_learned_via_proxy() {
        let obj = NetMeshObject::new_local(id("a"), 1);
        let proxy = placeholder_proxy(partner("there"));
        obj.append_neighbor(&id("b"), &[], None).unwrap();

        assert_eq!(obj.append_role_types(&id("b"), &[role("r/S")], None).unwrap(), vec![role("r/S")]);
        assert!(matches!(
            obj.append_role_types(&id("b"), &[role("r/S")], None),
            Err(MeshObjectError::RoleTypeBlessedAlready { .. })
        ));

        // Via a proxy, a known role is not an error and the proxy is recorded.
        assert!(obj.append_role_types(&id("b"), &[role("r/S")], Some(&proxy)).unwrap().is_empty());
        assert_eq!(obj.neighbor_identifiers_according_to(&partner("there")), vec![id("b")]);
        assert_eq!(obj.relationship_proxies_for(&id("b")).unwrap().len(), 1);

        assert!(matches!(
            obj.remove_role_types(&id("b"), &[role("r/D")], true),
            Err(MeshObjectError::RoleTypeNotBlessed { .. })
        ));
        assert_eq!(obj.remove_role_types(&id("b"), &[role("r/S")], true).unwrap(), vec![role("r/S")]);
    }

    #[test]
    fn test_neighbor_proxy_alignment_under_concurrency() {
        let first = Arc::new(NetMeshObject::new_local(id("first"), 1));
        let second = Arc::new(NetMeshObject::new_local(id("second"), 1));
        let proxy = placeholder_proxy(partner("there"));

        std::thread::scope(|s| {
            // Different objects from two threads.
            for obj in [&first, &second] {
                let proxy = proxy.clone();
                s.spawn(move || {
                    for i in 0..200 {
                        let via = (i % 2 == 0).then_some(&proxy);
                        obj.append_neighbor(&id(&format!("n{i}")), &[], via).unwrap();
                    }
                });
            }
        });

        std::thread::scope(|s| {
            // Same object from two threads: disjoint neighbors, nothing lost.
            for t in 0..2 {
                let first = &first;
                s.spawn(move || {
                    for i in 0..100 {
                        first.append_neighbor(&id(&format!("t{t}x{i}")), &[], None).unwrap();
                        if i % 3 == 0 {
                            first.remove_neighbor(&id(&format!("t{t}x{i}"))).unwrap();
                        }
                    }
                });
            }
        });

        for obj in [&first, &second] {
            assert_eq!(obj.neighbor_identifiers().len(), obj.relationship_proxies().len());
        }
        assert_eq!(second.neighbor_identifiers().len(), 200);
        assert_eq!(second.neighbor_identifiers_according_to(&partner("there")).len(), 100);
        // 200 own neighbors plus 2 * (100 - 34) survivors.
        assert_eq!(first.neighbor_identifiers().len(), 200 + 2 * 66);
    }

    #[test]
    fn test_lock_and_home_paths() {
        let obj = NetMeshObject::new_local(id("a"), 1);
        let there = placeholder_proxy(partner("there"));
        assert!(obj.has_lock());
        assert!(obj.is_home_replica());

        obj.set_proxy_towards_lock(Some(&there));
        assert!(!obj.has_lock());
        assert!(obj.lock_is_towards(&partner("there")));
        assert!(obj.replicates_towards(&partner("there")));
        assert!(there.partner_holds_lock(&id("a")));

        obj.set_proxy_towards_lock(None);
        assert!(obj.has_lock());
        assert!(!there.partner_holds_lock(&id("a")));

        obj.set_proxy_towards_home(Some(&there));
        assert!(obj.unregister_replication_towards(&partner("there")));
        assert!(obj.is_home_replica());
        assert!(!there.partner_holds_home(&id("a")));
        assert!(!obj.unregister_replication_towards(&partner("there")));
    }

    #[test]
    fn test_restore_tolerates_schema_drift() {
        let model = SimpleModelBase::new();
        model.register(
            EntityType::new("t/Person")
                .with_property("t/Person_Name", PropertyValue::String("anon".into()), false)
                .with_property("t/Person_Age", PropertyValue::Integer(0), false),
        );

        let obj = NetMeshObject::new_local(id("a"), 5);
        obj.insert_types(&["t/Person".into(), "t/Removed".into()]);
        obj.put_property(&"t/Person_Name".into(), Some(PropertyValue::String("Ann".into())));
        obj.put_property(&"t/Removed_Prop".into(), Some(PropertyValue::Boolean(true)));
        let externalized = obj.as_externalized(true);

        let restored = NetMeshObject::restore(&externalized, &model, |_| None);
        assert_eq!(restored.entity_types(), vec![EntityTypeId::from("t/Person")]);
        assert_eq!(
            restored.property_value(&"t/Person_Name".into()),
            Some(PropertyValue::String("Ann".into()))
        );
        assert_eq!(restored.property_value(&"t/Person_Age".into()), Some(PropertyValue::Integer(0)));
        assert_eq!(restored.property_value(&"t/Removed_Prop".into()), None);
        assert_eq!(restored.time_created(), 5);
    }

    #[test]
    fn test_externalized_without_proxies() {
        let obj = NetMeshObject::new_local(id("a"), 1);
        let there = placeholder_proxy(partner("there"));
        obj.append_neighbor(&id("b"), &[role("r/S")], Some(&there)).unwrap();
        obj.set_proxy_towards_lock(Some(&there));

        let captured = obj.as_externalized(true);
        assert_eq!(captured.proxies, vec![partner("there")]);
        assert_eq!(captured.proxy_towards_lock, Some(0));
        assert_eq!(captured.proxy_towards_home, None);
        assert_eq!(captured.neighbors[0].proxies, vec![partner("there")]);

        let conveyed = obj.as_externalized(false);
        assert!(conveyed.proxies.is_empty());
        assert_eq!(conveyed.proxy_towards_lock, None);
        assert!(conveyed.neighbors[0].proxies.is_empty());

        let restored = NetMeshObject::restore(&captured, &SimpleModelBase::new(), |p| {
            (p == there.partner()).then(|| there.clone())
        });
        assert!(restored.lock_is_towards(&partner("there")));
        assert_eq!(restored.relationship_proxies(), vec![vec![partner("there")]]);
    }

    #[test]
    fn test_ripple_marks_lock_and_home() {
        let source = NetMeshObject::new_local(id("x"), 1);
        let via = placeholder_proxy(partner("there"));
        let model = SimpleModelBase::new();

        let with_lock = NetMeshObject::ripple(&source.as_externalized(false), &model, &via, true, false, 9);
        assert!(with_lock.has_lock());
        assert!(!with_lock.is_home_replica());
        assert_eq!(with_lock.time_read(), 9);
        assert!(via.partner_holds_home(&id("x")));
        assert!(!via.partner_holds_lock(&id("x")));
    }
}
