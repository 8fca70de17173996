// Transaction — the only way to mutate mesh objects
//
// One transaction per mesh base at a time. Local mutations require the lock of
// every object they touch. Dropping an uncommitted transaction rolls it back.

pub mod event;

pub use event::Change;

use crate::identifier::{NetMeshBaseIdentifier, NetMeshObjectIdentifier};
use crate::mesh::{MeshObjectError, NetMeshObject};
use crate::meshbase::NetMeshBase;
use crate::model::{EntityTypeId, PropertyTypeId, PropertyValue, RoleTypeId};
use crate::now_millis;
use crate::policy::PolicyError;
use crate::proxy::Proxy;
use crate::xpriso::{ChangeKind, Deletion, EquivalentsChange, NeighborChange, PropertyChange, RoleChange, TypeChange};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransactionError {
    #[error("A transaction is active already on {0}")]
    ActiveAlready(NetMeshBaseIdentifier),
    #[error("Timed out waiting for a transaction on {0}")]
    TimedOut(NetMeshBaseIdentifier),
    #[error(transparent)]
    MeshObject(#[from] MeshObjectError),
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),
}

pub struct Transaction<'a> {
    base: &'a NetMeshBase,
    /// The proxy whose incoming message is being applied, if any.
    incoming: Option<Arc<Proxy>>,
    changes: Vec<Change>,
    touched: BTreeMap<NetMeshObjectIdentifier, Arc<NetMeshObject>>,
    /// Previous (will give up lock, will give up home) of objects whose preferences changed.
    preferences: Vec<(Arc<NetMeshObject>, bool, bool)>,
    done: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(base: &'a NetMeshBase, incoming: Option<Arc<Proxy>>) -> Self {
        base.proxy_manager().begin_deferral();
        Self {
            base,
            incoming,
            changes: Vec::new(),
            touched: BTreeMap::new(),
            preferences: Vec::new(),
            done: false,
        }
    }

    pub fn mesh_base(&self) -> &NetMeshBase {
        self.base
    }

    pub fn incoming(&self) -> Option<&Arc<Proxy>> {
        self.incoming.as_ref()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.touched.is_empty()
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Creates a local object with a fresh identifier, blessed with `types`.
    pub fn create_object(&mut self, types: &[EntityTypeId]) -> Result<Arc<NetMeshObject>, TransactionError> {
        let id = self.base.identifier_factory().create_identifier();
        self.create_object_with_id(id, types)
    }

    pub fn create_object_with_id(
        &mut self,
        id: NetMeshObjectIdentifier,
        types: &[EntityTypeId],
    ) -> Result<Arc<NetMeshObject>, TransactionError> {
        if self.base.find(&id).is_some() {
            return Err(MeshObjectError::ObjectExistsAlready(id).into());
        }
        for t in types {
            self.entity_type(t)?;
        }
        let object = Arc::new(NetMeshObject::new_local(id, now_millis()));
        self.base.cache_object(&object);
        self.record(Change::Created { object: object.clone() });
        if !types.is_empty() {
            self.bless(&object, types)?;
        }
        debug!("Created {}", object.identifier());
        Ok(object)
    }

    /// Deletes `object`, cascading through its relationships.
    pub fn delete_object(&mut self, object: &Arc<NetMeshObject>) -> Result<(), TransactionError> {
        self.require_lock(object)?;
        if object.is_home_object() {
            return Err(MeshObjectError::CannotDeleteHomeObject(object.identifier().clone()).into());
        }
        for neighbor in object.neighbor_identifiers() {
            self.unrelate_unchecked(object, &neighbor)?;
        }
        let now = now_millis();
        let proxies = object.proxies();
        object.set_dead(true);
        object.touch_updated(now);
        self.touched.remove(object.identifier());
        self.base.forget_object(object.identifier());
        self.record(Change::Deleted {
            object: object.clone(),
            proxies,
            time: now,
        });
        Ok(())
    }

    // ========================================================================
    // TYPES AND PROPERTIES
    // ========================================================================

    /// Blesses `object` with `types`; mandatory properties get their default.
    pub fn bless(&mut self, object: &Arc<NetMeshObject>, types: &[EntityTypeId]) -> Result<(), TransactionError> {
        self.require_lock(object)?;
        let mut definitions = Vec::with_capacity(types.len());
        for t in types {
            if object.is_blessed_by(t) {
                return Err(MeshObjectError::EntityBlessedAlready {
                    object: object.identifier().clone(),
                    entity_type: t.clone(),
                }
                .into());
            }
            definitions.push(self.entity_type(t)?);
        }
        let now = now_millis();
        let added = object.insert_types(types);
        self.record(Change::TypesAdded {
            object: object.clone(),
            types: added,
            time: now,
        });
        for definition in definitions {
            for property in definition.mandatory_properties() {
                if object.property_value(&property.id).is_none() {
                    self.put_property(object, &property.id, Some(property.default_value.clone()), now);
                }
            }
        }
        object.touch_updated(now);
        Ok(())
    }

    /// Removes `types`; properties no remaining type declares are removed too.
    pub fn unbless(&mut self, object: &Arc<NetMeshObject>, types: &[EntityTypeId]) -> Result<(), TransactionError> {
        self.require_lock(object)?;
        if let Some(missing) = types.iter().find(|t| !object.is_blessed_by(t)) {
            return Err(MeshObjectError::EntityNotBlessed {
                object: object.identifier().clone(),
                entity_type: missing.clone(),
            }
            .into());
        }
        let now = now_millis();
        let removed = object.remove_types(types);
        self.record(Change::TypesRemoved {
            object: object.clone(),
            types: removed,
            time: now,
        });
        let undeclared: Vec<PropertyTypeId> = object
            .properties()
            .into_keys()
            .filter(|p| !self.declared_by_any(object, p))
            .collect();
        for property in undeclared {
            self.put_property(object, &property, None, now);
        }
        object.touch_updated(now);
        Ok(())
    }

    pub fn set_property(
        &mut self,
        object: &Arc<NetMeshObject>,
        property: &PropertyTypeId,
        value: PropertyValue,
    ) -> Result<(), TransactionError> {
        self.require_lock(object)?;
        if !self.declared_by_any(object, property) {
            return Err(MeshObjectError::IllegalPropertyType {
                object: object.identifier().clone(),
                property: property.clone(),
            }
            .into());
        }
        let now = now_millis();
        self.put_property(object, property, Some(value), now);
        object.touch_updated(now);
        Ok(())
    }

    // ========================================================================
    // RELATIONSHIPS
    // ========================================================================

    pub fn relate(&mut self, a: &Arc<NetMeshObject>, b: &Arc<NetMeshObject>) -> Result<(), TransactionError> {
        self.require_lock(a)?;
        self.require_lock(b)?;
        a.append_neighbor(b.identifier(), &[], None)?;
        if let Err(e) = b.append_neighbor(a.identifier(), &[], None) {
            let _ = a.remove_neighbor(b.identifier());
            return Err(e.into());
        }
        let now = now_millis();
        for (object, neighbor) in [(a, b), (b, a)] {
            object.touch_updated(now);
            self.record(Change::NeighborAdded {
                object: object.clone(),
                neighbor: neighbor.identifier().clone(),
                role_types: Vec::new(),
                time: now,
            });
        }
        Ok(())
    }

    pub fn unrelate(&mut self, a: &Arc<NetMeshObject>, b: &Arc<NetMeshObject>) -> Result<(), TransactionError> {
        self.require_lock(a)?;
        self.require_lock(b)?;
        self.unrelate_unchecked(a, b.identifier())
    }

    /// Removes the relationship on both sides, as far as the neighbor is local.
    fn unrelate_unchecked(
        &mut self,
        a: &Arc<NetMeshObject>,
        neighbor: &NetMeshObjectIdentifier,
    ) -> Result<(), TransactionError> {
        let now = now_millis();
        let removed = a.remove_neighbor(neighbor)?;
        a.touch_updated(now);
        self.record(Change::NeighborRemoved {
            object: a.clone(),
            removed,
            time: now,
        });
        if let Some(b) = self.base.find(neighbor) {
            if let Ok(removed) = b.remove_neighbor(a.identifier()) {
                b.touch_updated(now);
                self.record(Change::NeighborRemoved {
                    object: b,
                    removed,
                    time: now,
                });
            }
        }
        Ok(())
    }

    /// Blesses the relationship from `object` to `neighbor` with role types.
    pub fn bless_role(
        &mut self,
        object: &Arc<NetMeshObject>,
        neighbor: &NetMeshObjectIdentifier,
        role_types: &[RoleTypeId],
    ) -> Result<(), TransactionError> {
        self.require_lock(object)?;
        let added = object.append_role_types(neighbor, role_types, None)?;
        let now = now_millis();
        object.touch_updated(now);
        self.record(Change::RolesAdded {
            object: object.clone(),
            neighbor: neighbor.clone(),
            role_types: added,
            time: now,
        });
        Ok(())
    }

    pub fn unbless_role(
        &mut self,
        object: &Arc<NetMeshObject>,
        neighbor: &NetMeshObjectIdentifier,
        role_types: &[RoleTypeId],
    ) -> Result<(), TransactionError> {
        self.require_lock(object)?;
        let removed = object.remove_role_types(neighbor, role_types, true)?;
        let now = now_millis();
        object.touch_updated(now);
        self.record(Change::RolesRemoved {
            object: object.clone(),
            neighbor: neighbor.clone(),
            role_types: removed,
            time: now,
        });
        Ok(())
    }

    // ========================================================================
    // EQUIVALENTS
    // ========================================================================

    pub fn add_equivalent(&mut self, a: &Arc<NetMeshObject>, b: &Arc<NetMeshObject>) -> Result<(), TransactionError> {
        self.require_lock(a)?;
        self.require_lock(b)?;
        if a.equivalents().contains(b.identifier()) {
            return Err(MeshObjectError::EquivalentAlready {
                object: a.identifier().clone(),
                other: b.identifier().clone(),
            }
            .into());
        }
        let now = now_millis();
        for (object, other) in [(a, b), (b, a)] {
            let added = object.insert_equivalents(std::slice::from_ref(other.identifier()));
            object.touch_updated(now);
            self.record(Change::EquivalentsAdded {
                object: object.clone(),
                equivalents: added,
                time: now,
            });
        }
        Ok(())
    }

    pub fn remove_equivalent(&mut self, a: &Arc<NetMeshObject>, b: &Arc<NetMeshObject>) -> Result<(), TransactionError> {
        self.require_lock(a)?;
        self.require_lock(b)?;
        let now = now_millis();
        for (object, other) in [(a, b), (b, a)] {
            let removed = object.remove_equivalents(std::slice::from_ref(other.identifier()));
            if !removed.is_empty() {
                object.touch_updated(now);
                self.record(Change::EquivalentsRemoved {
                    object: object.clone(),
                    equivalents: removed,
                    time: now,
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // REPLICATION PREFERENCES
    // ========================================================================

    /// Whether the lock may be handed to a partner that asks for it.
    pub fn set_will_give_up_lock(&mut self, object: &Arc<NetMeshObject>, value: bool) -> Result<(), TransactionError> {
        self.require_lock(object)?;
        self.remember_preferences(object);
        object.set_will_give_up_lock(value);
        self.touch(object);
        Ok(())
    }

    /// Whether the home replica may move to a partner that asks for it.
    pub fn set_will_give_up_home(&mut self, object: &Arc<NetMeshObject>, value: bool) -> Result<(), TransactionError> {
        if object.is_dead() {
            return Err(MeshObjectError::IsDead(object.identifier().clone()).into());
        }
        if !object.is_home_replica() {
            return Err(MeshObjectError::NotHomeReplica(object.identifier().clone()).into());
        }
        self.remember_preferences(object);
        object.set_will_give_up_home(value);
        self.touch(object);
        Ok(())
    }

    fn remember_preferences(&mut self, object: &Arc<NetMeshObject>) {
        self.preferences
            .push((object.clone(), object.will_give_up_lock(), object.will_give_up_home()));
    }

    // ========================================================================
    // REPLICATION ENTRY POINTS
    // ========================================================================

    /// Marks `object` for writing at commit without recording a change.
    pub(crate) fn touch(&mut self, object: &Arc<NetMeshObject>) {
        self.touched.insert(object.identifier().clone(), object.clone());
    }

    /// Adds a replica that just arrived from a partner.
    pub(crate) fn ripple_create(&mut self, object: Arc<NetMeshObject>) {
        self.base.cache_object(&object);
        self.record(Change::Created { object });
    }

    pub(crate) fn apply_property_change(&mut self, event: &PropertyChange) {
        let Some(object) = self.found(&event.object) else { return };
        let old = object.put_property(&event.property, event.value.clone());
        object.touch_updated(event.time_updated);
        self.record(Change::PropertyChanged {
            object,
            property: event.property.clone(),
            old,
            new: event.value.clone(),
            time: event.time_updated,
        });
    }

    pub(crate) fn apply_type_change(&mut self, event: &TypeChange) {
        let Some(object) = self.found(&event.object) else { return };
        let change = match event.kind {
            ChangeKind::Added => Change::TypesAdded {
                types: object.insert_types(&event.types),
                object: object.clone(),
                time: event.time_updated,
            },
            ChangeKind::Removed => Change::TypesRemoved {
                types: object.remove_types(&event.types),
                object: object.clone(),
                time: event.time_updated,
            },
        };
        object.touch_updated(event.time_updated);
        self.record(change);
    }

    pub(crate) fn apply_neighbor_change(&mut self, event: &NeighborChange, via: &Arc<Proxy>) {
        let Some(object) = self.found(&event.object) else { return };
        match event.kind {
            ChangeKind::Added => {
                if object.is_related_to(&event.neighbor) {
                    // Known locally already; remember the source.
                    let _ = object.append_role_types(&event.neighbor, &event.role_types, Some(via));
                    self.touch(&object);
                    return;
                }
                if let Err(e) = object.append_neighbor(&event.neighbor, &event.role_types, Some(via)) {
                    warn!("Cannot apply relationship change: {}", e);
                    return;
                }
                self.record(Change::NeighborAdded {
                    object: object.clone(),
                    neighbor: event.neighbor.clone(),
                    role_types: event.role_types.clone(),
                    time: event.time_updated,
                });
            }
            ChangeKind::Removed => match object.remove_neighbor(&event.neighbor) {
                Ok(removed) => self.record(Change::NeighborRemoved {
                    object: object.clone(),
                    removed,
                    time: event.time_updated,
                }),
                Err(e) => {
                    debug!("Relationship gone already: {}", e);
                    return;
                }
            },
        }
        object.touch_updated(event.time_updated);
    }

    pub(crate) fn apply_role_change(&mut self, event: &RoleChange, via: &Arc<Proxy>) {
        let Some(object) = self.found(&event.object) else { return };
        let change = match event.kind {
            ChangeKind::Added => {
                if !object.is_related_to(&event.neighbor) {
                    if let Err(e) = object.append_neighbor(&event.neighbor, &[], Some(via)) {
                        warn!("Cannot apply role change: {}", e);
                        return;
                    }
                    self.record(Change::NeighborAdded {
                        object: object.clone(),
                        neighbor: event.neighbor.clone(),
                        role_types: Vec::new(),
                        time: event.time_updated,
                    });
                }
                match object.append_role_types(&event.neighbor, &event.role_types, Some(via)) {
                    Ok(added) => Change::RolesAdded {
                        object: object.clone(),
                        neighbor: event.neighbor.clone(),
                        role_types: added,
                        time: event.time_updated,
                    },
                    Err(e) => {
                        warn!("Cannot apply role change: {}", e);
                        return;
                    }
                }
            }
            ChangeKind::Removed => match object.remove_role_types(&event.neighbor, &event.role_types, false) {
                Ok(removed) => Change::RolesRemoved {
                    object: object.clone(),
                    neighbor: event.neighbor.clone(),
                    role_types: removed,
                    time: event.time_updated,
                },
                Err(e) => {
                    debug!("Role change on unrelated objects ignored: {}", e);
                    return;
                }
            },
        };
        object.touch_updated(event.time_updated);
        self.record(change);
    }

    pub(crate) fn apply_equivalents_change(&mut self, event: &EquivalentsChange) {
        let Some(object) = self.found(&event.object) else { return };
        let change = match event.kind {
            ChangeKind::Added => Change::EquivalentsAdded {
                equivalents: object.insert_equivalents(&event.equivalents),
                object: object.clone(),
                time: event.time_updated,
            },
            ChangeKind::Removed => Change::EquivalentsRemoved {
                equivalents: object.remove_equivalents(&event.equivalents),
                object: object.clone(),
                time: event.time_updated,
            },
        };
        object.touch_updated(event.time_updated);
        self.record(change);
    }

    pub(crate) fn apply_deletion(&mut self, event: &Deletion) {
        let Some(object) = self.found(&event.object) else { return };
        for neighbor in object.neighbor_identifiers() {
            if let Err(e) = self.unrelate_unchecked(&object, &neighbor) {
                debug!("Cascading deletion of {}: {}", object.identifier(), e);
            }
        }
        let proxies = object.proxies();
        object.set_dead(true);
        object.touch_updated(event.time_updated);
        self.touched.remove(object.identifier());
        self.base.forget_object(object.identifier());
        self.record(Change::Deleted {
            object,
            proxies,
            time: event.time_updated,
        });
    }

    // ========================================================================
    // COMMIT AND ROLLBACK
    // ========================================================================

    /// Writes all touched objects and proxies, then tells the partners.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        self.done = true;
        let changes = std::mem::take(&mut self.changes);
        let touched = std::mem::take(&mut self.touched);
        self.preferences.clear();

        let deleted: BTreeSet<&NetMeshObjectIdentifier> =
            changes.iter().filter(|c| c.is_deletion()).map(|c| c.identifier()).collect();
        let mut staged: BTreeMap<NetMeshObjectIdentifier, Arc<NetMeshObject>> = touched;
        staged.retain(|id, _| !deleted.contains(id));
        for change in &changes {
            if !deleted.contains(change.identifier()) {
                staged.insert(change.identifier().clone(), change.object().clone());
            }
        }
        for object in staged.values() {
            self.base.stage_object(object);
        }
        let written = self.base.end_transaction();
        debug!("Committed {} changes, {} records written", changes.len(), written);

        self.base.propagate(&changes, self.incoming.as_ref())?;
        Ok(())
    }

    /// Undoes every recorded change, newest first.
    pub fn rollback(mut self) {
        self.undo();
    }

    fn undo(&mut self) {
        self.done = true;
        let changes = std::mem::take(&mut self.changes);
        if !changes.is_empty() {
            debug!("Rolling back {} changes", changes.len());
        }
        for change in changes.into_iter().rev() {
            match change {
                Change::Created { object } => {
                    object.release_proxies();
                    object.set_dead(true);
                    self.base.forget_object(object.identifier());
                }
                Change::Deleted { object, .. } => {
                    object.set_dead(false);
                    self.base.cache_object(&object);
                    self.base.stage_object(&object);
                }
                Change::PropertyChanged { object, property, old, .. } => {
                    object.put_property(&property, old);
                }
                Change::TypesAdded { object, types, .. } => {
                    object.remove_types(&types);
                }
                Change::TypesRemoved { object, types, .. } => {
                    object.insert_types(&types);
                }
                Change::NeighborAdded { object, neighbor, .. } => {
                    let _ = object.remove_neighbor(&neighbor);
                }
                Change::NeighborRemoved { object, removed, .. } => object.restore_neighbor(removed),
                Change::RolesAdded {
                    object,
                    neighbor,
                    role_types,
                    ..
                } => {
                    let _ = object.remove_role_types(&neighbor, &role_types, false);
                }
                Change::RolesRemoved {
                    object,
                    neighbor,
                    role_types,
                    ..
                } => {
                    let _ = object.append_role_types(&neighbor, &role_types, None);
                }
                Change::EquivalentsAdded { object, equivalents, .. } => {
                    object.remove_equivalents(&equivalents);
                }
                Change::EquivalentsRemoved { object, equivalents, .. } => {
                    object.insert_equivalents(&equivalents);
                }
            }
        }
        for (object, lock, home) in self.preferences.drain(..).rev() {
            object.set_will_give_up_lock(lock);
            object.set_will_give_up_home(home);
        }
        self.touched.clear();
        self.base.end_transaction();
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn record(&mut self, change: Change) {
        self.changes.push(change);
    }

    fn found(&self, id: &NetMeshObjectIdentifier) -> Option<Arc<NetMeshObject>> {
        let found = self.base.find(id);
        if found.is_none() {
            debug!("Event for unknown {} ignored", id);
        }
        found
    }

    fn require_lock(&self, object: &NetMeshObject) -> Result<(), MeshObjectError> {
        if object.is_dead() {
            return Err(MeshObjectError::IsDead(object.identifier().clone()));
        }
        if !object.has_lock() {
            return Err(MeshObjectError::DoNotHaveLock(object.identifier().clone()));
        }
        Ok(())
    }

    fn entity_type(&self, id: &EntityTypeId) -> Result<Arc<crate::model::EntityType>, MeshObjectError> {
        self.base
            .model()
            .find_entity_type(id)
            .ok_or_else(|| MeshObjectError::UnknownEntityType(id.clone()))
    }

    fn declared_by_any(&self, object: &NetMeshObject, property: &PropertyTypeId) -> bool {
        object
            .entity_types()
            .iter()
            .filter_map(|t| self.base.model().find_entity_type(t))
            .any(|t| t.declares(property))
    }

    fn put_property(
        &mut self,
        object: &Arc<NetMeshObject>,
        property: &PropertyTypeId,
        value: Option<PropertyValue>,
        now: i64,
    ) {
        let old = object.put_property(property, value.clone());
        if old != value {
            self.record(Change::PropertyChanged {
                object: object.clone(),
                property: property.clone(),
                old,
                new: value,
                time: now,
            });
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.undo();
        }
    }
}
