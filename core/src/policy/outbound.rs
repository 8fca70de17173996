// Outbound operations — locally initiated requests towards one partner

use super::{PeerRole, PolicyError, ProxyPolicy, ProxyProcessingInstructions};
use crate::identifier::NetMeshObjectIdentifier;
use crate::mesh::NetMeshObject;
use crate::proxy::{AwaitingState, Proxy};
use crate::xpriso::PerhapsOutgoing;
use std::sync::Arc;
use tracing::debug;

impl ProxyPolicy {
    /// Fails for roles that may not initiate `operation`.
    fn require(&self, operation: &'static str, shadow_allowed: bool) -> Result<(), PolicyError> {
        match self.role {
            PeerRole::FullDuplex => Ok(()),
            PeerRole::Shadow if shadow_allowed => Ok(()),
            _ => Err(self.unsupported(operation)),
        }
    }

    fn finish(
        proxy: &Proxy,
        mut ret: ProxyProcessingInstructions,
        out: PerhapsOutgoing,
        expects_response: bool,
    ) -> ProxyProcessingInstructions {
        if let Some(mut message) = out.into_message() {
            if expects_response {
                message.request_id = proxy.obtain_request_id();
                ret.expects_response = true;
            }
            ret.send_via_endpoint = Some(message);
            ret.start_communicating = true;
        }
        ret
    }

    /// Asks the partner for first replicas of `ids`.
    pub fn obtain_replicas(
        &self,
        ids: &[NetMeshObjectIdentifier],
        proxy: &Proxy,
    ) -> Result<ProxyProcessingInstructions, PolicyError> {
        self.require("obtain replicas", false)?;
        let mut ret = ProxyProcessingInstructions::new();
        let mut out = Self::outgoing(proxy);
        for id in ids {
            out.obtain().requested_first_time_objects.push(id.clone());
            ret.await_object(id, AwaitingState::FirstReplica);
        }
        Ok(Self::finish(proxy, ret, out, true))
    }

    /// Requests the locks of `objects` whose lock lies across `proxy`.
    pub fn try_to_obtain_locks(
        &self,
        objects: &[Arc<NetMeshObject>],
        proxy: &Proxy,
    ) -> Result<ProxyProcessingInstructions, PolicyError> {
        self.require("obtain locks", false)?;
        let mut ret = ProxyProcessingInstructions::new();
        let mut out = Self::outgoing(proxy);
        for object in objects {
            if object.lock_is_towards(proxy.partner()) {
                out.obtain().requested_lock_objects.push(object.identifier().clone());
                ret.await_object(object.identifier(), AwaitingState::Lock);
            } else {
                debug!("Lock of {} does not lie towards {}", object.identifier(), proxy.partner());
            }
        }
        Ok(Self::finish(proxy, ret, out, true))
    }

    /// Hands the locks of `objects` to the partner, conveying replicas it lacks.
    pub fn try_to_push_locks(
        &self,
        objects: &[Arc<NetMeshObject>],
        proxy: &Proxy,
    ) -> Result<ProxyProcessingInstructions, PolicyError> {
        self.require("push locks", false)?;
        let mut ret = ProxyProcessingInstructions::new();
        let mut out = Self::outgoing(proxy);
        for object in objects {
            let id = object.identifier();
            if !object.has_lock() {
                debug!("Cannot push lock of {}, not held", id);
                continue;
            }
            if !object.replicates_towards(proxy.partner()) {
                out.obtain().conveyed_objects.push(object.as_externalized(false));
                ret.register_replications.push(id.clone());
            }
            ret.surrender_locks.push(id.clone());
            out.obtain().push_lock_objects.push(id.clone());
        }
        Ok(Self::finish(proxy, ret, out, false))
    }

    /// Takes the locks of `objects` back without asking, notifying the partner.
    pub fn force_obtain_locks(
        &self,
        objects: &[Arc<NetMeshObject>],
        proxy: &Proxy,
    ) -> Result<ProxyProcessingInstructions, PolicyError> {
        self.require("force-obtain locks", false)?;
        let mut ret = ProxyProcessingInstructions::new();
        let mut out = Self::outgoing(proxy);
        for object in objects {
            if object.lock_is_towards(proxy.partner()) {
                let id = object.identifier();
                ret.receive_locks.push(id.clone());
                out.obtain().reclaimed_lock_objects.push(id.clone());
                ret.await_object(id, AwaitingState::Reclaim);
            }
        }
        Ok(Self::finish(proxy, ret, out, true))
    }

    pub fn try_to_obtain_home(
        &self,
        objects: &[Arc<NetMeshObject>],
        proxy: &Proxy,
    ) -> Result<ProxyProcessingInstructions, PolicyError> {
        self.require("obtain home replicas", false)?;
        let mut ret = ProxyProcessingInstructions::new();
        let mut out = Self::outgoing(proxy);
        for object in objects {
            if object.home_is_towards(proxy.partner()) {
                out.obtain().requested_home_replicas.push(object.identifier().clone());
                ret.await_object(object.identifier(), AwaitingState::Home);
            }
        }
        Ok(Self::finish(proxy, ret, out, true))
    }

    pub fn try_to_push_home(
        &self,
        objects: &[Arc<NetMeshObject>],
        proxy: &Proxy,
    ) -> Result<ProxyProcessingInstructions, PolicyError> {
        self.require("push home replicas", false)?;
        let mut ret = ProxyProcessingInstructions::new();
        let mut out = Self::outgoing(proxy);
        for object in objects {
            let id = object.identifier();
            if !object.is_home_replica() {
                debug!("Cannot push home of {}, not local", id);
                continue;
            }
            if !object.replicates_towards(proxy.partner()) {
                out.obtain().conveyed_objects.push(object.as_externalized(false));
                ret.register_replications.push(id.clone());
            }
            ret.surrender_homes.push(id.clone());
            out.obtain().push_home_replicas.push(id.clone());
        }
        Ok(Self::finish(proxy, ret, out, false))
    }

    /// Asks for full replicas of `objects` again.
    pub fn try_resynchronize(
        &self,
        objects: &[Arc<NetMeshObject>],
        proxy: &Proxy,
    ) -> Result<ProxyProcessingInstructions, PolicyError> {
        self.require("resynchronize replicas", true)?;
        let mut ret = ProxyProcessingInstructions::new();
        let mut out = Self::outgoing(proxy);
        for object in objects {
            out.obtain().requested_resynchronize_replicas.push(object.identifier().clone());
            ret.await_object(object.identifier(), AwaitingState::Resync);
        }
        Ok(Self::finish(proxy, ret, out, true))
    }

    /// Stops replicating `objects` through `proxy`.
    ///
    /// Replicas whose home lies across the proxy are purged locally and the
    /// partner is told; a lock held here goes back with the cancellation.
    pub fn cancel_replicas(
        &self,
        objects: &[Arc<NetMeshObject>],
        proxy: &Proxy,
    ) -> Result<ProxyProcessingInstructions, PolicyError> {
        self.require("cancel replicas", true)?;
        let mut ret = ProxyProcessingInstructions::new();
        let mut out = Self::outgoing(proxy);
        for object in objects {
            let id = object.identifier();
            if object.home_is_towards(proxy.partner()) {
                if object.has_lock() {
                    out.obtain().push_lock_objects.push(id.clone());
                }
                out.obtain().requested_canceled_objects.push(id.clone());
                ret.purges.push(id.clone());
            } else {
                ret.unregister_replications.push(id.clone());
            }
        }
        Ok(Self::finish(proxy, ret, out, false))
    }

    /// Lightweight up-to-date check for `objects`.
    pub fn freshen(
        &self,
        objects: &[Arc<NetMeshObject>],
        proxy: &Proxy,
    ) -> Result<ProxyProcessingInstructions, PolicyError> {
        self.require("freshen replicas", false)?;
        let mut ret = ProxyProcessingInstructions::new();
        let mut out = Self::outgoing(proxy);
        for object in objects {
            out.obtain().requested_freshen_replicas.push(object.identifier().clone());
            ret.await_object(object.identifier(), AwaitingState::Resync);
        }
        Ok(Self::finish(proxy, ret, out, true))
    }

    /// The partner is gone for good: unregister everything and say goodbye.
    pub fn proxy_death(
        &self,
        objects: &[Arc<NetMeshObject>],
        proxy: &Proxy,
    ) -> Result<ProxyProcessingInstructions, PolicyError> {
        let mut ret = ProxyProcessingInstructions::new();
        ret.unregister_replications = objects.iter().map(|o| o.identifier().clone()).collect();
        ret.cease_communicating = true;
        if self.role != PeerRole::Placeholder {
            let mut out = Self::outgoing(proxy);
            out.obtain().cease_communications = true;
            ret.send_via_endpoint = out.into_message();
        }
        Ok(ret)
    }
}
