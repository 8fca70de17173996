// Access control — which peer may see, create or delete which replica

use crate::identifier::{NetMeshBaseIdentifier, NetMeshObjectIdentifier};
use parking_lot::RwLock;
use std::collections::BTreeSet;

/// Answers entitlement questions for replication traffic.
///
/// Consulted when filtering outgoing content and when admitting incoming content.
pub trait NetAccessManager: Send + Sync {
    /// May `peer` receive replicas of, and changes to, `object`?
    fn can_see(&self, peer: &NetMeshBaseIdentifier, object: &NetMeshObjectIdentifier) -> bool;

    /// May `peer` cause a local replica of `object` to be created here?
    fn can_create(&self, peer: &NetMeshBaseIdentifier, object: &NetMeshObjectIdentifier) -> bool;

    /// May `peer` delete the local replica of `object`?
    fn can_delete(&self, peer: &NetMeshBaseIdentifier, object: &NetMeshObjectIdentifier) -> bool;
}

/// Allows everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveAccessManager;

impl NetAccessManager for PermissiveAccessManager {
    fn can_see(&self, _peer: &NetMeshBaseIdentifier, _object: &NetMeshObjectIdentifier) -> bool {
        true
    }

    fn can_create(&self, _peer: &NetMeshBaseIdentifier, _object: &NetMeshObjectIdentifier) -> bool {
        true
    }

    fn can_delete(&self, _peer: &NetMeshBaseIdentifier, _object: &NetMeshObjectIdentifier) -> bool {
        true
    }
}

/// Per-peer access list.
///
/// Blocked peers get nothing. Read-only peers may see replicas but may neither
/// create nor delete replicas here. Hidden objects are never shown to anybody.
#[derive(Debug, Default)]
pub struct PeerAccessList {
    blocked: RwLock<BTreeSet<NetMeshBaseIdentifier>>,
    read_only: RwLock<BTreeSet<NetMeshBaseIdentifier>>,
    hidden: RwLock<BTreeSet<NetMeshObjectIdentifier>>,
}

impl PeerAccessList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, peer: NetMeshBaseIdentifier) {
        self.blocked.write().insert(peer);
    }

    pub fn unblock(&self, peer: &NetMeshBaseIdentifier) {
        self.blocked.write().remove(peer);
    }

    pub fn set_read_only(&self, peer: NetMeshBaseIdentifier) {
        self.read_only.write().insert(peer);
    }

    pub fn hide(&self, object: NetMeshObjectIdentifier) {
        self.hidden.write().insert(object);
    }

    fn is_blocked(&self, peer: &NetMeshBaseIdentifier) -> bool {
        self.blocked.read().contains(peer)
    }
}

impl NetAccessManager for PeerAccessList {
    fn can_see(&self, peer: &NetMeshBaseIdentifier, object: &NetMeshObjectIdentifier) -> bool {
        !self.is_blocked(peer) && !self.hidden.read().contains(object)
    }

    fn can_create(&self, peer: &NetMeshBaseIdentifier, _object: &NetMeshObjectIdentifier) -> bool {
        !self.is_blocked(peer) && !self.read_only.read().contains(peer)
    }

    fn can_delete(&self, peer: &NetMeshBaseIdentifier, object: &NetMeshObjectIdentifier) -> bool {
        self.can_create(peer, object)
    }
}
