// Incoming message processing
//
// Directive lists are processed in a fixed order: a step may rely on objects
// that an earlier step decided to materialize.

use super::{PeerRole, PolicyError, ProxyPolicy, ProxyProcessingInstructions, ReplicaContext, RippleInstructions};
use crate::identifier::NetMeshObjectIdentifier;
use crate::mesh::ExternalizedNetMeshObject;
use crate::proxy::{AwaitingState, Proxy};
use crate::xpriso::{ObjectEvent, PerhapsOutgoing, XprisoMessage};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

type Step = fn(&ProxyPolicy, &mut Incoming<'_>) -> Result<(), PolicyError>;

const FULL_DUPLEX_ORDER: &[Step] = &[
    ProxyPolicy::first_time_requested,
    ProxyPolicy::resynchronize_requested,
    ProxyPolicy::freshen_requested,
    ProxyPolicy::home_requested,
    ProxyPolicy::lock_requested,
    ProxyPolicy::locks_reclaimed,
    ProxyPolicy::objects_canceled,
    ProxyPolicy::objects_conveyed,
    ProxyPolicy::locks_pushed,
    ProxyPolicy::homes_pushed,
    ProxyPolicy::property_changes,
    ProxyPolicy::type_changes,
    ProxyPolicy::neighbor_changes,
    ProxyPolicy::equivalent_changes,
    ProxyPolicy::deletions,
];

/// A shadow never serves freshen requests.
const SHADOW_ORDER: &[Step] = &[
    ProxyPolicy::first_time_requested,
    ProxyPolicy::resynchronize_requested,
    ProxyPolicy::home_requested,
    ProxyPolicy::lock_requested,
    ProxyPolicy::locks_reclaimed,
    ProxyPolicy::objects_canceled,
    ProxyPolicy::objects_conveyed,
    ProxyPolicy::locks_pushed,
    ProxyPolicy::homes_pushed,
    ProxyPolicy::property_changes,
    ProxyPolicy::type_changes,
    ProxyPolicy::neighbor_changes,
    ProxyPolicy::equivalent_changes,
    ProxyPolicy::deletions,
];

pub(crate) struct Incoming<'a> {
    message: &'a XprisoMessage,
    proxy: &'a Arc<Proxy>,
    ctx: &'a dyn ReplicaContext,
    ret: ProxyProcessingInstructions,
    out: PerhapsOutgoing,
    rejected: BTreeSet<NetMeshObjectIdentifier>,
}

impl Incoming<'_> {
    fn partner(&self) -> &crate::identifier::NetMeshBaseIdentifier {
        self.proxy.partner()
    }

    fn can_see(&self, id: &NetMeshObjectIdentifier) -> bool {
        self.ctx.access_manager().can_see(self.partner(), id)
    }

    /// Known locally, or about to be created by this message.
    fn resolves(&self, id: &NetMeshObjectIdentifier) -> bool {
        self.ret.is_ripple_create(id) || self.ctx.find_replica(id).is_some()
    }

    /// Was an event on `id` authored by whoever holds its lock?
    fn from_lock_holder(&self, id: &NetMeshObjectIdentifier) -> bool {
        if self.ret.is_ripple_create(id) || self.ret.receive_locks.contains(id) {
            return true;
        }
        match self.ctx.find_replica(id) {
            Some(object) => object.lock_is_towards(self.partner()),
            None => false,
        }
    }

    fn convey(&mut self, id: &NetMeshObjectIdentifier, what: &str) {
        match self.ctx.find_replica(id) {
            Some(object) if self.can_see(id) => {
                self.out.obtain().conveyed_objects.push(object.as_externalized(false));
                if !self.ret.register_replications.contains(id) {
                    self.ret.register_replications.push(id.clone());
                }
            }
            _ => {
                debug!("Cannot serve {} request for {} to {}", what, id, self.partner());
                self.out.obtain().requested_canceled_objects.push(id.clone());
            }
        }
    }

    fn reject(&mut self, id: &NetMeshObjectIdentifier, got_lock: bool, got_home: bool) {
        warn!("Rejecting conveyed {} from {}", id, self.partner());
        self.rejected.insert(id.clone());
        let out = self.out.obtain();
        if got_lock {
            out.push_lock_objects.push(id.clone());
        }
        if got_home {
            out.push_home_replicas.push(id.clone());
        }
        out.requested_canceled_objects.push(id.clone());
    }

    fn accept_content<E: ObjectEvent>(&self, event: &E, what: &str) -> bool {
        let id = event.object();
        if self.rejected.contains(id) {
            return false;
        }
        if !self.resolves(id) {
            debug!("Ignoring {} for unknown {} from {}", what, id, self.partner());
            return false;
        }
        if !self.from_lock_holder(id) {
            warn!("Ignoring {} for {} from {}, which does not hold the lock", what, id, self.partner());
            return false;
        }
        true
    }
}

impl ProxyPolicy {
    /// The central dispatch for a message that arrived through `proxy`.
    pub fn calculate_for_incoming_message(
        &self,
        message: &XprisoMessage,
        proxy: &Arc<Proxy>,
        ctx: &dyn ReplicaContext,
    ) -> Result<ProxyProcessingInstructions, PolicyError> {
        let order = match self.role {
            PeerRole::FullDuplex => FULL_DUPLEX_ORDER,
            PeerRole::Shadow => SHADOW_ORDER,
            PeerRole::Placeholder => return Err(self.unsupported("incoming messages")),
        };

        let mut incoming = Incoming {
            message,
            proxy,
            ctx,
            ret: ProxyProcessingInstructions::new(),
            out: PerhapsOutgoing::new(proxy.local_identifier().clone(), proxy.partner().clone()),
            rejected: BTreeSet::new(),
        };
        for step in order {
            step(self, &mut incoming)?;
        }

        let Incoming { mut ret, mut out, .. } = incoming;
        ret.cease_communicating = message.cease_communications;
        if message.request_id != 0 {
            out.obtain().response_id = message.request_id;
        }
        if let Some(response) = out.into_message() {
            ret.send_via_endpoint = Some(response);
            ret.start_communicating = true;
        }
        Ok(ret)
    }

    // ========================================================================
    // REQUESTS
    // ========================================================================

    fn first_time_requested(&self, inc: &mut Incoming<'_>) -> Result<(), PolicyError> {
        let message = inc.message;
        for id in &message.requested_first_time_objects {
            inc.convey(id, "first-time");
        }
        Ok(())
    }

    fn resynchronize_requested(&self, inc: &mut Incoming<'_>) -> Result<(), PolicyError> {
        let message = inc.message;
        for id in &message.requested_resynchronize_replicas {
            inc.convey(id, "resynchronize");
        }
        Ok(())
    }

    pub(crate) fn freshen_requested(&self, inc: &mut Incoming<'_>) -> Result<(), PolicyError> {
        let message = inc.message;
        if self.role != PeerRole::FullDuplex {
            return Err(self.unsupported("freshen requests"));
        }
        for id in &message.requested_freshen_replicas {
            inc.convey(id, "freshen");
        }
        Ok(())
    }

    fn home_requested(&self, inc: &mut Incoming<'_>) -> Result<(), PolicyError> {
        let message = inc.message;
        if self.role == PeerRole::Shadow {
            return Ok(());
        }
        for id in &message.requested_home_replicas {
            let Some(object) = inc.ctx.find_replica(id) else {
                continue;
            };
            if object.is_home_replica() && object.will_give_up_home() && inc.can_see(id) {
                inc.ret.surrender_homes.push(id.clone());
                inc.out.obtain().push_home_replicas.push(id.clone());
            } else {
                debug!("Not giving up home of {} to {}", id, inc.partner());
            }
        }
        Ok(())
    }

    fn lock_requested(&self, inc: &mut Incoming<'_>) -> Result<(), PolicyError> {
        let message = inc.message;
        for id in &message.requested_lock_objects {
            let Some(object) = inc.ctx.find_replica(id) else {
                continue;
            };
            if object.has_lock() && object.will_give_up_lock() && inc.can_see(id) {
                inc.ret.surrender_locks.push(id.clone());
                inc.out.obtain().push_lock_objects.push(id.clone());
            } else {
                debug!("Not giving up lock of {} to {}", id, inc.partner());
            }
        }
        Ok(())
    }

    fn locks_reclaimed(&self, inc: &mut Incoming<'_>) -> Result<(), PolicyError> {
        let message = inc.message;
        for id in &message.reclaimed_lock_objects {
            let Some(object) = inc.ctx.find_replica(id) else {
                continue;
            };
            let contested = object.has_lock() && inc.proxy.awaiting(id) == Some(AwaitingState::Reclaim);
            if contested && inc.ctx.local_identifier() < inc.partner() {
                debug!("Keeping contested lock of {} against {}", id, inc.partner());
                inc.out.obtain().reclaimed_lock_objects.push(id.clone());
            } else if !object.lock_is_towards(inc.partner()) {
                // Confirm by pushing the lock we no longer hold.
                if object.has_lock() {
                    inc.out.obtain().push_lock_objects.push(id.clone());
                }
                inc.ret.surrender_locks.push(id.clone());
                inc.ret.resolve(id);
            }
        }
        Ok(())
    }

    fn objects_canceled(&self, inc: &mut Incoming<'_>) -> Result<(), PolicyError> {
        let message = inc.message;
        for id in &message.requested_canceled_objects {
            if inc.proxy.awaiting(id).is_some() {
                inc.ret.resolve(id);
            }
            if inc.ctx.find_replica(id).is_some() {
                inc.ret.unregister_replications.push(id.clone());
            }
        }
        Ok(())
    }

    // ========================================================================
    // CONVEYED OBJECTS
    // ========================================================================

    fn objects_conveyed(&self, inc: &mut Incoming<'_>) -> Result<(), PolicyError> {
        let message = inc.message;
        for conveyed in &message.conveyed_objects {
            let id = &conveyed.identifier;
            let got_lock = message.push_lock_objects.contains(id);
            let got_home = message.push_home_replicas.contains(id);
            match self.role {
                PeerRole::Shadow => self.shadow_conveyed(inc, conveyed, got_lock, got_home),
                _ => self.full_duplex_conveyed(inc, conveyed, got_lock, got_home),
            }
        }
        Ok(())
    }

    fn full_duplex_conveyed(&self, inc: &mut Incoming<'_>, conveyed: &ExternalizedNetMeshObject, got_lock: bool, got_home: bool) {
        let id = &conveyed.identifier;
        let awaiting = inc.proxy.awaiting(id);
        let ripple = RippleInstructions {
            externalized: conveyed.clone(),
            holds_lock: got_lock,
            holds_home: got_home,
        };
        match inc.ctx.find_replica(id) {
            Some(existing) => {
                if existing.replicates_towards(inc.partner()) || awaiting == Some(AwaitingState::Resync) {
                    inc.ret.ripple_resynchronizes.push(ripple);
                    inc.ret.resolve(id);
                } else {
                    inc.reject(id, got_lock, got_home);
                }
            }
            None => {
                let wanted = awaiting == Some(AwaitingState::FirstReplica)
                    || (inc.ctx.is_writable() && inc.ctx.access_manager().can_create(inc.partner(), id));
                if wanted {
                    inc.ret.ripple_creates.push(ripple);
                    if awaiting.is_some() {
                        inc.ret.resolve(id);
                    }
                } else {
                    inc.reject(id, got_lock, got_home);
                }
            }
        }
    }

    fn shadow_conveyed(&self, inc: &mut Incoming<'_>, conveyed: &ExternalizedNetMeshObject, got_lock: bool, got_home: bool) {
        let id = &conveyed.identifier;
        let wanted = inc.ctx.find_replica(id).is_none() && inc.ctx.is_writable() && got_home;
        if wanted {
            inc.ret.ripple_creates.push(RippleInstructions {
                externalized: conveyed.clone(),
                holds_lock: got_lock,
                holds_home: true,
            });
        } else {
            inc.reject(id, got_lock, got_home);
        }
    }

    // ========================================================================
    // PUSHED LOCKS AND HOMES
    // ========================================================================

    fn locks_pushed(&self, inc: &mut Incoming<'_>) -> Result<(), PolicyError> {
        let message = inc.message;
        for id in &message.push_lock_objects {
            if inc.ret.is_ripple_create(id) || inc.rejected.contains(id) {
                continue;
            }
            let resynced = inc.ret.ripple_resynchronizes.iter().any(|r| &r.externalized.identifier == id);
            match inc.ctx.find_replica(id) {
                _ if resynced => inc.ret.resolve(id),
                Some(object) if object.has_lock() && inc.proxy.awaiting(id) == Some(AwaitingState::Reclaim) => {
                    debug!("Reclaim of {} confirmed by {}", id, inc.partner());
                    inc.ret.resolve(id);
                }
                Some(object) if !object.has_lock() => {
                    inc.ret.receive_locks.push(id.clone());
                    inc.ret.resolve(id);
                }
                Some(_) => debug!("Lock of {} pushed by {} but held already", id, inc.partner()),
                None => warn!("Lock of unknown {} pushed by {}", id, inc.partner()),
            }
        }
        Ok(())
    }

    fn homes_pushed(&self, inc: &mut Incoming<'_>) -> Result<(), PolicyError> {
        let message = inc.message;
        for id in &message.push_home_replicas {
            if inc.ret.is_ripple_create(id) || inc.rejected.contains(id) {
                continue;
            }
            match inc.ctx.find_replica(id) {
                Some(object) if !object.is_home_replica() => {
                    inc.ret.receive_homes.push(id.clone());
                    inc.ret.resolve(id);
                }
                Some(_) => debug!("Home of {} pushed by {} but local already", id, inc.partner()),
                None => warn!("Home of unknown {} pushed by {}", id, inc.partner()),
            }
        }
        Ok(())
    }

    // ========================================================================
    // CONTENT CHANGES
    // ========================================================================

    fn property_changes(&self, inc: &mut Incoming<'_>) -> Result<(), PolicyError> {
        let message = inc.message;
        for event in &message.property_changes {
            if inc.accept_content(event, "property change") {
                inc.ret.property_changes.push(event.clone());
            }
        }
        Ok(())
    }

    fn type_changes(&self, inc: &mut Incoming<'_>) -> Result<(), PolicyError> {
        let message = inc.message;
        for event in &message.type_changes {
            if inc.accept_content(event, "type change") {
                inc.ret.type_changes.push(event.clone());
            }
        }
        Ok(())
    }

    /// Relationship and role events.
    fn neighbor_changes(&self, inc: &mut Incoming<'_>) -> Result<(), PolicyError> {
        let message = inc.message;
        for event in &message.neighbor_changes {
            if self.accept_relationship(inc, event, &event.neighbor, "relationship change") {
                inc.ret.neighbor_changes.push(event.clone());
            }
        }
        for event in &message.role_changes {
            if self.accept_relationship(inc, event, &event.neighbor, "role change") {
                inc.ret.role_changes.push(event.clone());
            }
        }
        Ok(())
    }

    fn accept_relationship<E: ObjectEvent>(
        &self,
        inc: &Incoming<'_>,
        event: &E,
        neighbor: &NetMeshObjectIdentifier,
        what: &str,
    ) -> bool {
        match self.role {
            PeerRole::Shadow => inc.resolves(event.object()) && inc.resolves(neighbor) && inc.ctx.is_writable(),
            _ => inc.accept_content(event, what),
        }
    }

    fn equivalent_changes(&self, inc: &mut Incoming<'_>) -> Result<(), PolicyError> {
        let message = inc.message;
        for event in &message.equivalent_changes {
            let accepted = match self.role {
                PeerRole::Shadow => {
                    inc.resolves(&event.object) && event.equivalents.iter().all(|e| inc.resolves(e))
                }
                _ => inc.accept_content(event, "equivalents change"),
            };
            if accepted {
                inc.ret.equivalent_changes.push(event.clone());
            }
        }
        Ok(())
    }

    fn deletions(&self, inc: &mut Incoming<'_>) -> Result<(), PolicyError> {
        let message = inc.message;
        for event in &message.deletions {
            let Some(object) = inc.ctx.find_replica(&event.object) else {
                debug!("Deletion of unknown {} from {}", event.object, inc.partner());
                continue;
            };
            let authorized = object.lock_is_towards(inc.partner()) || object.home_is_towards(inc.partner());
            if authorized && inc.ctx.access_manager().can_delete(inc.partner(), &event.object) {
                inc.ret.deletions.push(event.clone());
            } else {
                warn!("Refusing deletion of {} from {}", event.object, inc.partner());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::NetMeshBaseIdentifier;
    use crate::mesh::NetMeshObject;
    use crate::model::PropertyValue;
    use crate::policy::testing::TestContext;
    use crate::proxy::testing::{local, proxy_with};
    use crate::transport::MockMessageEndpoint;
    use crate::xpriso::{PropertyChange, RoleChange, ChangeKind};

    fn partner() -> NetMeshBaseIdentifier {
        NetMeshBaseIdentifier::from_external_form("http://there.example/").unwrap()
    }

    fn remote(local_id: &str) -> NetMeshObjectIdentifier {
        NetMeshObjectIdentifier::new(partner(), local_id).unwrap()
    }

    fn mine(local_id: &str) -> NetMeshObjectIdentifier {
        NetMeshObjectIdentifier::new(local(), local_id).unwrap()
    }

    fn proxy(role: PeerRole) -> Arc<Proxy> {
        proxy_with(partner(), Arc::new(MockMessageEndpoint::new()), role)
    }

    fn from_partner() -> XprisoMessage {
        XprisoMessage::new(partner(), local())
    }

    fn conveyed(id: NetMeshObjectIdentifier) -> ExternalizedNetMeshObject {
        NetMeshObject::new_local(id, 1).as_externalized(false)
    }

    #[test]
    fn test_first_time_request_conveys_and_registers() {
        let ctx = TestContext::new(local());
        ctx.add(NetMeshObject::new_local(mine("a"), 1));
        let mut message = from_partner();
        message.request_id = 17;
        message.requested_first_time_objects = vec![mine("a"), mine("missing")];

        let ret = ProxyPolicy::new(PeerRole::FullDuplex)
            .calculate_for_incoming_message(&message, &proxy(PeerRole::FullDuplex), &ctx)
            .unwrap();
        assert_eq!(ret.register_replications, vec![mine("a")]);
        let response = ret.send_via_endpoint.unwrap();
        assert_eq!(response.response_id, 17);
        assert_eq!(response.conveyed_objects[0].identifier, mine("a"));
        assert_eq!(response.requested_canceled_objects, vec![mine("missing")]);
        assert!(ret.start_communicating);
    }

    #[test]
    fn test_conveyed_duplicate_is_rejected_with_lock_echo() {
        let ctx = TestContext::new(local());
        ctx.add(NetMeshObject::new_local(remote("x"), 1));
        let mut message = from_partner();
        message.conveyed_objects = vec![conveyed(remote("x"))];
        message.push_lock_objects = vec![remote("x")];

        let ret = ProxyPolicy::new(PeerRole::FullDuplex)
            .calculate_for_incoming_message(&message, &proxy(PeerRole::FullDuplex), &ctx)
            .unwrap();
        assert!(ret.ripple_creates.is_empty());
        assert!(ret.receive_locks.is_empty());
        let response = ret.send_via_endpoint.unwrap();
        assert_eq!(response.push_lock_objects, vec![remote("x")]);
        assert_eq!(response.requested_canceled_objects, vec![remote("x")]);
    }

    #[test]
    fn test_non_writable_accepts_only_requested_objects() {
        let mut ctx = TestContext::new(local());
        ctx.writable = false;
        let proxy = proxy(PeerRole::FullDuplex);
        proxy.set_awaiting(remote("wanted"), AwaitingState::FirstReplica);

        let mut message = from_partner();
        message.conveyed_objects = vec![conveyed(remote("wanted")), conveyed(remote("offered"))];
        let ret = ProxyPolicy::new(PeerRole::FullDuplex)
            .calculate_for_incoming_message(&message, &proxy, &ctx)
            .unwrap();
        assert_eq!(ret.ripple_creates.len(), 1);
        assert_eq!(ret.ripple_creates[0].externalized.identifier, remote("wanted"));
        assert!(!ret.ripple_creates[0].holds_lock);
        assert_eq!(ret.resolved, vec![remote("wanted")]);
        assert_eq!(
            ret.send_via_endpoint.unwrap().requested_canceled_objects,
            vec![remote("offered")]
        );
    }

    #[test]
    fn test_role_change_for_conveyed_object_is_accepted() {
        let ctx = TestContext::new(local());
        let mut message = from_partner();
        message.conveyed_objects = vec![conveyed(remote("x"))];
        message.role_changes = vec![RoleChange {
            object: remote("x"),
            kind: ChangeKind::Added,
            neighbor: remote("y"),
            role_types: vec!["r/S".into()],
            time_updated: 3,
        }];
        let ret = ProxyPolicy::new(PeerRole::FullDuplex)
            .calculate_for_incoming_message(&message, &proxy(PeerRole::FullDuplex), &ctx)
            .unwrap();
        assert_eq!(ret.ripple_creates.len(), 1);
        assert_eq!(ret.role_changes.len(), 1);
        assert!(ret.send_via_endpoint.is_none());
    }

    #[test]
    fn test_changes_from_non_lock_holder_ignored() {
        let ctx = TestContext::new(local());
        let proxy = proxy(PeerRole::FullDuplex);
        let held_here = ctx.add(NetMeshObject::new_local(remote("here"), 1));
        held_here.register_replication_towards(&proxy);
        let held_there = ctx.add(NetMeshObject::new_local(remote("there"), 1));
        held_there.set_proxy_towards_lock(Some(&proxy));

        let change = |object| PropertyChange {
            object,
            property: "t/P".into(),
            value: Some(PropertyValue::Integer(2)),
            time_updated: 4,
        };
        let mut message = from_partner();
        message.property_changes = vec![change(remote("here")), change(remote("there"))];
        let ret = ProxyPolicy::new(PeerRole::FullDuplex)
            .calculate_for_incoming_message(&message, &proxy, &ctx)
            .unwrap();
        assert_eq!(ret.property_changes.len(), 1);
        assert_eq!(ret.property_changes[0].object, remote("there"));
    }

    #[test]
    fn test_lock_request_honors_will_give_up() {
        let ctx = TestContext::new(local());
        let yielding = ctx.add(NetMeshObject::new_local(mine("yielding"), 1));
        let stubborn = ctx.add(NetMeshObject::new_local(mine("stubborn"), 1));
        stubborn.set_will_give_up_lock(false);
        assert!(yielding.will_give_up_lock());

        let mut message = from_partner();
        message.requested_lock_objects = vec![mine("yielding"), mine("stubborn")];
        let ret = ProxyPolicy::new(PeerRole::FullDuplex)
            .calculate_for_incoming_message(&message, &proxy(PeerRole::FullDuplex), &ctx)
            .unwrap();
        assert_eq!(ret.surrender_locks, vec![mine("yielding")]);
        assert_eq!(ret.send_via_endpoint.unwrap().push_lock_objects, vec![mine("yielding")]);
    }

    #[test]
    fn test_contested_reclaim_lowest_identifier_keeps_lock() {
        // local() sorts below partner(): "http://here..." < "http://there...".
        let ctx = TestContext::new(local());
        let proxy = proxy(PeerRole::FullDuplex);
        let object = ctx.add(NetMeshObject::new_local(mine("x"), 1));
        object.register_replication_towards(&proxy);
        proxy.set_awaiting(mine("x"), AwaitingState::Reclaim);

        let mut message = from_partner();
        message.reclaimed_lock_objects = vec![mine("x")];
        let ret = ProxyPolicy::new(PeerRole::FullDuplex)
            .calculate_for_incoming_message(&message, &proxy, &ctx)
            .unwrap();
        assert!(ret.surrender_locks.is_empty());
        assert_eq!(ret.send_via_endpoint.unwrap().reclaimed_lock_objects, vec![mine("x")]);

        // Without an outstanding reclaim of our own, the reclaim wins.
        proxy.clear_awaiting(&mine("x"));
        let ret = ProxyPolicy::new(PeerRole::FullDuplex)
            .calculate_for_incoming_message(&message, &proxy, &ctx)
            .unwrap();
        assert_eq!(ret.surrender_locks, vec![mine("x")]);
        assert_eq!(ret.send_via_endpoint.unwrap().push_lock_objects, vec![mine("x")]);
    }

    #[test]
    fn test_deletion_requires_lock_or_home_path() {
        let ctx = TestContext::new(local());
        let proxy = proxy(PeerRole::FullDuplex);
        let ours = ctx.add(NetMeshObject::new_local(mine("ours"), 1));
        ours.register_replication_towards(&proxy);
        let theirs = ctx.add(NetMeshObject::new_local(remote("theirs"), 1));
        theirs.set_proxy_towards_home(Some(&proxy));

        let mut message = from_partner();
        message.deletions = vec![
            crate::xpriso::Deletion {
                object: mine("ours"),
                time_updated: 1,
            },
            crate::xpriso::Deletion {
                object: remote("theirs"),
                time_updated: 1,
            },
        ];
        let ret = ProxyPolicy::new(PeerRole::FullDuplex)
            .calculate_for_incoming_message(&message, &proxy, &ctx)
            .unwrap();
        assert_eq!(ret.deletions.len(), 1);
        assert_eq!(ret.deletions[0].object, remote("theirs"));
    }

    #[test]
    fn test_shadow_skips_freshen_and_wants_only_pushed_homes() {
        let ctx = TestContext::new(local());
        ctx.add(NetMeshObject::new_local(mine("a"), 1));
        let proxy = proxy(PeerRole::Shadow);
        let policy = ProxyPolicy::new(PeerRole::Shadow);

        let mut message = from_partner();
        message.requested_freshen_replicas = vec![mine("a")];
        message.conveyed_objects = vec![conveyed(remote("homed")), conveyed(remote("plain"))];
        message.push_home_replicas = vec![remote("homed")];
        let ret = policy.calculate_for_incoming_message(&message, &proxy, &ctx).unwrap();

        assert_eq!(ret.ripple_creates.len(), 1);
        assert!(ret.ripple_creates[0].holds_home);
        let response = ret.send_via_endpoint.unwrap();
        assert!(response.conveyed_objects.is_empty());
        assert_eq!(response.requested_canceled_objects, vec![remote("plain")]);

        let mut direct = Incoming {
            message: &message,
            proxy: &proxy,
            ctx: &ctx,
            ret: ProxyProcessingInstructions::new(),
            out: PerhapsOutgoing::new(local(), partner()),
            rejected: BTreeSet::new(),
        };
        assert_eq!(
            policy.freshen_requested(&mut direct),
            Err(PolicyError::Unsupported {
                role: PeerRole::Shadow,
                operation: "freshen requests"
            })
        );
    }

    #[test]
    fn test_shadow_ignores_home_requests() {
        let ctx = TestContext::new(local());
        ctx.add(NetMeshObject::new_local(mine("a"), 1));
        let mut message = from_partner();
        message.requested_home_replicas = vec![mine("a")];
        let ret = ProxyPolicy::new(PeerRole::Shadow)
            .calculate_for_incoming_message(&message, &proxy(PeerRole::Shadow), &ctx)
            .unwrap();
        assert!(ret.is_empty());
    }

    #[test]
    fn test_placeholder_rejects_incoming() {
        let ctx = TestContext::new(local());
        let result = ProxyPolicy::new(PeerRole::Placeholder).calculate_for_incoming_message(
            &from_partner(),
            &proxy(PeerRole::Placeholder),
            &ctx,
        );
        assert!(matches!(result, Err(PolicyError::Unsupported { .. })));
    }
}
