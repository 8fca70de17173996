// Wire change events carried inside an XprisoMessage

use crate::identifier::NetMeshObjectIdentifier;
use crate::model::{EntityTypeId, PropertyTypeId, PropertyValue, RoleTypeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Removed,
}

/// A property was set. `None` removes the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub object: NetMeshObjectIdentifier,
    pub property: PropertyTypeId,
    pub value: Option<PropertyValue>,
    pub time_updated: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeChange {
    pub object: NetMeshObjectIdentifier,
    pub kind: ChangeKind,
    pub types: Vec<EntityTypeId>,
    pub time_updated: i64,
}

/// A relationship was created or removed. `role_types` are those carried at the time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborChange {
    pub object: NetMeshObjectIdentifier,
    pub kind: ChangeKind,
    pub neighbor: NetMeshObjectIdentifier,
    pub role_types: Vec<RoleTypeId>,
    pub time_updated: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleChange {
    pub object: NetMeshObjectIdentifier,
    pub kind: ChangeKind,
    pub neighbor: NetMeshObjectIdentifier,
    pub role_types: Vec<RoleTypeId>,
    pub time_updated: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquivalentsChange {
    pub object: NetMeshObjectIdentifier,
    pub kind: ChangeKind,
    pub equivalents: Vec<NetMeshObjectIdentifier>,
    pub time_updated: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deletion {
    pub object: NetMeshObjectIdentifier,
    pub time_updated: i64,
}

/// Common view of events that change one object.
pub trait ObjectEvent {
    fn object(&self) -> &NetMeshObjectIdentifier;
}

macro_rules! object_event {
    ($($t:ty),*) => {
        $(impl ObjectEvent for $t {
            fn object(&self) -> &NetMeshObjectIdentifier {
                &self.object
            }
        })*
    };
}

object_event!(PropertyChange, TypeChange, NeighborChange, RoleChange, EquivalentsChange, Deletion);
