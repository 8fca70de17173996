// Instruction execution — carries out what a policy decided
//
// Steps run in the order the instructions list them: replicas first, then
// replication bookkeeping, content changes, awaiting states, and finally the
// message to the partner. Every touched object and the proxy are written back.

use super::NetMeshBase;
use crate::identifier::{NetMeshBaseIdentifier, NetMeshObjectIdentifier};
use crate::mesh::NetMeshObject;
use crate::now_millis;
use crate::policy::ProxyProcessingInstructions;
use crate::proxy::{AwaitingState, Proxy, ProxyError, ProxyParameters};
use crate::transaction::Transaction;
use crate::xpriso::XprisoMessage;
use crate::MeshBaseError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

impl NetMeshBase {
    /// Applies a message that arrived from `from`.
    pub(crate) fn process_incoming(&self, from: &NetMeshBaseIdentifier, message: XprisoMessage) -> Result<(), MeshBaseError> {
        message.check(from, &self.identifier)?;
        let proxy = self.proxies.obtain_for(from, &ProxyParameters::default())?;
        proxy.message_received(&message);
        proxy.touch_read(now_millis());

        let mut tx = self.create_incoming_transaction(&proxy)?;
        let instructions = proxy.policy().calculate_for_incoming_message(&message, &proxy, self)?;
        debug!(
            "Executing {} ripples, {} changes from {}",
            instructions.ripple_creates.len() + instructions.ripple_resynchronizes.len(),
            instructions.property_changes.len() + instructions.neighbor_changes.len() + instructions.deletions.len(),
            from
        );
        let sent = self.execute(instructions, &proxy, Some(&mut tx));
        tx.commit()?;
        sent?;
        Ok(())
    }

    /// Carries out `instructions` for `proxy`.
    ///
    /// Content changes need `tx`; without one they are dropped with a warning.
    /// A failure to transmit is reported only after all local steps ran.
    pub(crate) fn execute(
        &self,
        instructions: ProxyProcessingInstructions,
        proxy: &Arc<Proxy>,
        mut tx: Option<&mut Transaction<'_>>,
    ) -> Result<(), ProxyError> {
        let now = now_millis();
        let ins = instructions;
        let mut touched: BTreeMap<NetMeshObjectIdentifier, Arc<NetMeshObject>> = BTreeMap::new();

        for ripple in &ins.ripple_creates {
            let object = Arc::new(NetMeshObject::ripple(
                &ripple.externalized,
                self.model.as_ref(),
                proxy,
                ripple.holds_lock,
                ripple.holds_home,
                now,
            ));
            debug!("Ripple-created {} via {}", object.identifier(), proxy.partner());
            match tx.as_mut() {
                Some(tx) => tx.ripple_create(object.clone()),
                None => self.cache_object(&object),
            }
            touched.insert(object.identifier().clone(), object);
        }
        if !ins.ripple_creates.is_empty() && proxy.coherence().is_periodic() && proxy.times().next_freshen < 0 {
            proxy.schedule_freshen(now);
        }

        for ripple in &ins.ripple_resynchronizes {
            let Some(object) = self.find(&ripple.externalized.identifier) else {
                warn!("Cannot resynchronize unknown {}", ripple.externalized.identifier);
                continue;
            };
            object.resynchronize(&ripple.externalized, self.model.as_ref(), proxy, now);
            object.register_replication_towards(proxy);
            if ripple.holds_lock {
                object.set_proxy_towards_lock(None);
            }
            if ripple.holds_home {
                object.set_proxy_towards_home(None);
            }
            touched.insert(object.identifier().clone(), object);
        }

        for id in &ins.register_replications {
            if let Some(object) = self.lookup(id, &touched) {
                object.register_replication_towards(proxy);
                touched.insert(id.clone(), object);
            }
        }
        for id in &ins.unregister_replications {
            if let Some(object) = self.lookup(id, &touched) {
                object.unregister_replication_towards(proxy.partner());
                touched.insert(id.clone(), object);
            }
        }

        for id in &ins.surrender_locks {
            if let Some(object) = self.lookup(id, &touched) {
                object.set_proxy_towards_lock(Some(proxy));
                if matches!(proxy.awaiting(id), Some(AwaitingState::Lock | AwaitingState::Reclaim)) {
                    proxy.clear_awaiting(id);
                }
                touched.insert(id.clone(), object);
            }
        }
        for id in &ins.surrender_homes {
            if let Some(object) = self.lookup(id, &touched) {
                object.set_proxy_towards_home(Some(proxy));
                if proxy.awaiting(id) == Some(AwaitingState::Home) {
                    proxy.clear_awaiting(id);
                }
                touched.insert(id.clone(), object);
            }
        }
        for id in &ins.receive_locks {
            if let Some(object) = self.lookup(id, &touched) {
                object.set_proxy_towards_lock(None);
                touched.insert(id.clone(), object);
            }
        }
        for id in &ins.receive_homes {
            if let Some(object) = self.lookup(id, &touched) {
                object.set_proxy_towards_home(None);
                touched.insert(id.clone(), object);
            }
        }

        for id in &ins.purges {
            let object = touched.remove(id).or_else(|| self.find(id));
            let Some(object) = object else { continue };
            debug!("Purging {}", id);
            object.release_proxies();
            object.set_dead(true);
            if tx.is_some() {
                self.forget_object(id);
            } else {
                self.remove_object(id);
            }
        }

        if ins.has_content_changes() {
            match tx.as_mut() {
                Some(tx) => {
                    for event in &ins.property_changes {
                        tx.apply_property_change(event);
                    }
                    for event in &ins.type_changes {
                        tx.apply_type_change(event);
                    }
                    for event in &ins.neighbor_changes {
                        tx.apply_neighbor_change(event, proxy);
                    }
                    for event in &ins.role_changes {
                        tx.apply_role_change(event, proxy);
                    }
                    for event in &ins.equivalent_changes {
                        tx.apply_equivalents_change(event);
                    }
                    for event in &ins.deletions {
                        touched.remove(&event.object);
                        tx.apply_deletion(event);
                    }
                }
                None => warn!("Content changes from {} outside a transaction dropped", proxy.partner()),
            }
        }

        for (id, state) in &ins.awaiting {
            proxy.set_awaiting(id.clone(), *state);
        }
        for id in &ins.resolved {
            proxy.clear_awaiting(id);
        }

        let sent = match ins.send_via_endpoint {
            Some(message) => proxy.transmit(message, ins.start_communicating),
            None if ins.start_communicating => proxy.start_communicating(),
            None => Ok(()),
        };
        if ins.cease_communicating {
            debug!("Ceasing communication with {}", proxy.partner());
            proxy.stop_communicating();
        }

        for object in touched.values() {
            match tx.as_mut() {
                Some(tx) => tx.touch(object),
                None => self.save_object(object),
            }
        }
        proxy.touch_updated(now);
        proxy.notify_updated();

        if let Err(e) = &sent {
            warn!("Transmit towards {} failed: {}", proxy.partner(), e);
        }
        sent
    }

    fn lookup(
        &self,
        id: &NetMeshObjectIdentifier,
        touched: &BTreeMap<NetMeshObjectIdentifier, Arc<NetMeshObject>>,
    ) -> Option<Arc<NetMeshObject>> {
        let found = touched.get(id).cloned().or_else(|| self.find(id));
        if found.is_none() {
            debug!("No replica of {} to update", id);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use crate::identifier::{NetMeshBaseIdentifier, NetMeshObjectIdentifier};
    use crate::meshbase::NetMeshBase;
    use crate::policy::ProxyProcessingInstructions;
    use crate::proxy::{AwaitingState, ProxyParameters};
    use crate::transport::LoopbackNetwork;
    use std::sync::Arc;

    fn id(raw: &str) -> NetMeshBaseIdentifier {
        NetMeshBaseIdentifier::from_external_form(raw).unwrap()
    }

    fn pair() -> (LoopbackNetwork, Arc<NetMeshBase>) {
        let network = LoopbackNetwork::new();
        let base = NetMeshBase::builder(id("test://a"))
            .endpoint_factory(Arc::new(network.clone()))
            .build()
            .unwrap();
        (network, base)
    }

    #[test]
    fn test_surrender_clears_lock_awaiting() {
        let (_network, base) = pair();
        let proxy = base.proxy_manager().obtain_for(&id("test://b"), &ProxyParameters::default()).unwrap();
        let object = {
            let mut tx = base.create_transaction().unwrap();
            let object = tx.create_object(&[]).unwrap();
            tx.commit().unwrap();
            object
        };
        proxy.set_awaiting(object.identifier().clone(), AwaitingState::Reclaim);

        let mut ins = ProxyProcessingInstructions::new();
        ins.surrender_locks.push(object.identifier().clone());
        base.execute(ins, &proxy, None).unwrap();

        assert!(!object.has_lock());
        assert!(object.lock_is_towards(proxy.partner()));
        assert!(proxy.partner_holds_lock(object.identifier()));
        assert_eq!(proxy.awaiting(object.identifier()), None);
    }

    #[test]
    fn test_purge_outside_transaction_removes_record() {
        let (_network, base) = pair();
        let proxy = base.proxy_manager().obtain_for(&id("test://b"), &ProxyParameters::default()).unwrap();
        let object = {
            let mut tx = base.create_transaction().unwrap();
            let object = tx.create_object(&[]).unwrap();
            tx.commit().unwrap();
            object
        };
        assert_eq!(base.size().unwrap(), 2);

        let mut ins = ProxyProcessingInstructions::new();
        ins.purges.push(object.identifier().clone());
        base.execute(ins, &proxy, None).unwrap();

        assert!(object.is_dead());
        assert!(base.find(object.identifier()).is_none());
        assert_eq!(base.size().unwrap(), 1);
    }

    #[test]
    fn test_cease_stops_endpoint_after_sending() {
        let (network, base) = pair();
        let proxy = base.proxy_manager().obtain_for(&id("test://b"), &ProxyParameters::default()).unwrap();
        let wanted = NetMeshObjectIdentifier::new(id("test://b"), "x").unwrap();
        let mut ins = proxy.policy().obtain_replicas(&[wanted], &proxy).unwrap();
        ins.cease_communicating = true;
        base.execute(ins, &proxy, None).unwrap();
        assert_eq!(network.pending(), 1);
        assert!(!proxy.is_communicating());
    }
}
