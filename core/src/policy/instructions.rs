// ProxyProcessingInstructions — what the mesh base must do after a policy decision

use crate::identifier::NetMeshObjectIdentifier;
use crate::mesh::ExternalizedNetMeshObject;
use crate::proxy::AwaitingState;
use crate::xpriso::{Deletion, EquivalentsChange, NeighborChange, PropertyChange, RoleChange, TypeChange, XprisoMessage};

/// A replica to create or refresh from a conveyed object.
#[derive(Debug, Clone, PartialEq)]
pub struct RippleInstructions {
    pub externalized: ExternalizedNetMeshObject,
    /// The lock came along, so the local replica holds it.
    pub holds_lock: bool,
    /// The home came along, so the local replica is home.
    pub holds_home: bool,
}

/// Single-use command batch, executed by the mesh base in field order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProxyProcessingInstructions {
    pub ripple_creates: Vec<RippleInstructions>,
    pub ripple_resynchronizes: Vec<RippleInstructions>,

    pub register_replications: Vec<NetMeshObjectIdentifier>,
    pub unregister_replications: Vec<NetMeshObjectIdentifier>,
    /// Lock now lies across the proxy.
    pub surrender_locks: Vec<NetMeshObjectIdentifier>,
    /// Home now lies across the proxy.
    pub surrender_homes: Vec<NetMeshObjectIdentifier>,
    /// Lock is now held locally.
    pub receive_locks: Vec<NetMeshObjectIdentifier>,
    /// Home is now local.
    pub receive_homes: Vec<NetMeshObjectIdentifier>,
    /// Local replicas to drop without emitting deletions.
    pub purges: Vec<NetMeshObjectIdentifier>,

    pub property_changes: Vec<PropertyChange>,
    pub type_changes: Vec<TypeChange>,
    pub neighbor_changes: Vec<NeighborChange>,
    pub role_changes: Vec<RoleChange>,
    pub equivalent_changes: Vec<EquivalentsChange>,
    pub deletions: Vec<Deletion>,

    pub awaiting: Vec<(NetMeshObjectIdentifier, AwaitingState)>,
    pub resolved: Vec<NetMeshObjectIdentifier>,

    pub send_via_endpoint: Option<XprisoMessage>,
    pub expects_response: bool,
    pub start_communicating: bool,
    pub cease_communicating: bool,
}

impl ProxyProcessingInstructions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn has_content_changes(&self) -> bool {
        !(self.property_changes.is_empty()
            && self.type_changes.is_empty()
            && self.neighbor_changes.is_empty()
            && self.role_changes.is_empty()
            && self.equivalent_changes.is_empty()
            && self.deletions.is_empty())
    }

    pub fn is_ripple_create(&self, id: &NetMeshObjectIdentifier) -> bool {
        self.ripple_creates.iter().any(|r| &r.externalized.identifier == id)
    }

    pub(crate) fn await_object(&mut self, id: &NetMeshObjectIdentifier, state: AwaitingState) {
        self.awaiting.push((id.clone(), state));
    }

    pub(crate) fn resolve(&mut self, id: &NetMeshObjectIdentifier) {
        if !self.resolved.contains(id) {
            self.resolved.push(id.clone());
        }
    }
}
