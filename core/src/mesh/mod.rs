// Mesh objects — replicated graph nodes

pub mod externalized;
pub mod object;

pub use externalized::{ExternalizedNeighbor, ExternalizedNetMeshObject};
pub use object::{Neighbor, NetMeshObject};

use crate::identifier::{NetMeshBaseIdentifier, NetMeshObjectIdentifier};
use crate::model::{EntityTypeId, PropertyTypeId, RoleTypeId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshObjectError {
    #[error("{object} is related to {neighbor} already")]
    RelatedAlready {
        object: NetMeshObjectIdentifier,
        neighbor: NetMeshObjectIdentifier,
    },
    #[error("{object} is not related to {neighbor}")]
    NotRelated {
        object: NetMeshObjectIdentifier,
        neighbor: NetMeshObjectIdentifier,
    },
    #[error("Role {role} between {object} and {neighbor} is blessed already")]
    RoleTypeBlessedAlready {
        object: NetMeshObjectIdentifier,
        neighbor: NetMeshObjectIdentifier,
        role: RoleTypeId,
    },
    #[error("Role {role} between {object} and {neighbor} is not blessed")]
    RoleTypeNotBlessed {
        object: NetMeshObjectIdentifier,
        neighbor: NetMeshObjectIdentifier,
        role: RoleTypeId,
    },
    #[error("{object} is blessed with {entity_type} already")]
    EntityBlessedAlready {
        object: NetMeshObjectIdentifier,
        entity_type: EntityTypeId,
    },
    #[error("{object} is not blessed with {entity_type}")]
    EntityNotBlessed {
        object: NetMeshObjectIdentifier,
        entity_type: EntityTypeId,
    },
    #[error("Unknown entity type {0}")]
    UnknownEntityType(EntityTypeId),
    #[error("Property {property} is not carried by {object}")]
    IllegalPropertyType {
        object: NetMeshObjectIdentifier,
        property: PropertyTypeId,
    },
    #[error("{object} is equivalent to {other} already")]
    EquivalentAlready {
        object: NetMeshObjectIdentifier,
        other: NetMeshObjectIdentifier,
    },
    #[error("{0} is not the lock holder")]
    DoNotHaveLock(NetMeshObjectIdentifier),
    #[error("{0} is not the home replica")]
    NotHomeReplica(NetMeshObjectIdentifier),
    #[error("{0} is dead")]
    IsDead(NetMeshObjectIdentifier),
    #[error("Cannot delete home object {0}")]
    CannotDeleteHomeObject(NetMeshObjectIdentifier),
    #[error("{object} does not replicate towards {partner}")]
    NotReplicatedTowards {
        object: NetMeshObjectIdentifier,
        partner: NetMeshBaseIdentifier,
    },
    #[error("Object exists already: {0}")]
    ObjectExistsAlready(NetMeshObjectIdentifier),
}
