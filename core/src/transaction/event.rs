// Change — one recorded modification inside a transaction
//
// Each change carries enough to be undone and to be described to a partner.

use crate::identifier::NetMeshObjectIdentifier;
use crate::mesh::{Neighbor, NetMeshObject};
use crate::model::{EntityTypeId, PropertyTypeId, PropertyValue, RoleTypeId};
use crate::proxy::Proxy;
use std::sync::Arc;

#[derive(Clone)]
pub enum Change {
    Created {
        object: Arc<NetMeshObject>,
    },
    /// Replication bookkeeping is captured so partners can still be told.
    Deleted {
        object: Arc<NetMeshObject>,
        proxies: Vec<Arc<Proxy>>,
        time: i64,
    },
    PropertyChanged {
        object: Arc<NetMeshObject>,
        property: PropertyTypeId,
        old: Option<PropertyValue>,
        new: Option<PropertyValue>,
        time: i64,
    },
    TypesAdded {
        object: Arc<NetMeshObject>,
        types: Vec<EntityTypeId>,
        time: i64,
    },
    TypesRemoved {
        object: Arc<NetMeshObject>,
        types: Vec<EntityTypeId>,
        time: i64,
    },
    NeighborAdded {
        object: Arc<NetMeshObject>,
        neighbor: NetMeshObjectIdentifier,
        role_types: Vec<RoleTypeId>,
        time: i64,
    },
    NeighborRemoved {
        object: Arc<NetMeshObject>,
        removed: Neighbor,
        time: i64,
    },
    RolesAdded {
        object: Arc<NetMeshObject>,
        neighbor: NetMeshObjectIdentifier,
        role_types: Vec<RoleTypeId>,
        time: i64,
    },
    RolesRemoved {
        object: Arc<NetMeshObject>,
        neighbor: NetMeshObjectIdentifier,
        role_types: Vec<RoleTypeId>,
        time: i64,
    },
    EquivalentsAdded {
        object: Arc<NetMeshObject>,
        equivalents: Vec<NetMeshObjectIdentifier>,
        time: i64,
    },
    EquivalentsRemoved {
        object: Arc<NetMeshObject>,
        equivalents: Vec<NetMeshObjectIdentifier>,
        time: i64,
    },
}

impl Change {
    pub fn object(&self) -> &Arc<NetMeshObject> {
        match self {
            Change::Created { object }
            | Change::Deleted { object, .. }
            | Change::PropertyChanged { object, .. }
            | Change::TypesAdded { object, .. }
            | Change::TypesRemoved { object, .. }
            | Change::NeighborAdded { object, .. }
            | Change::NeighborRemoved { object, .. }
            | Change::RolesAdded { object, .. }
            | Change::RolesRemoved { object, .. }
            | Change::EquivalentsAdded { object, .. }
            | Change::EquivalentsRemoved { object, .. } => object,
        }
    }

    pub fn identifier(&self) -> &NetMeshObjectIdentifier {
        self.object().identifier()
    }

    /// Proxies a partner must hear about this change through.
    pub fn proxies(&self) -> Vec<Arc<Proxy>> {
        match self {
            Change::Deleted { proxies, .. } => proxies.clone(),
            other => other.object().proxies(),
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, Change::Deleted { .. })
    }
}

impl std::fmt::Debug for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Change::Created { .. } => "Created",
            Change::Deleted { .. } => "Deleted",
            Change::PropertyChanged { .. } => "PropertyChanged",
            Change::TypesAdded { .. } => "TypesAdded",
            Change::TypesRemoved { .. } => "TypesRemoved",
            Change::NeighborAdded { .. } => "NeighborAdded",
            Change::NeighborRemoved { .. } => "NeighborRemoved",
            Change::RolesAdded { .. } => "RolesAdded",
            Change::RolesRemoved { .. } => "RolesRemoved",
            Change::EquivalentsAdded { .. } => "EquivalentsAdded",
            Change::EquivalentsRemoved { .. } => "EquivalentsRemoved",
        };
        write!(f, "{}({})", kind, self.identifier())
    }
}
