// Externalized mesh objects — the serializable form used on the wire and at rest

use crate::identifier::{NetMeshBaseIdentifier, NetMeshObjectIdentifier};
use crate::model::{EntityTypeId, PropertyTypeId, PropertyValue, RoleTypeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalizedNeighbor {
    pub identifier: NetMeshObjectIdentifier,
    pub role_types: Vec<RoleTypeId>,
    /// Partners the relationship was learned through. Empty when conveyed.
    #[serde(default)]
    pub proxies: Vec<NetMeshBaseIdentifier>,
}

/// Snapshot of one replica.
///
/// When stored locally, `proxies` lists the partners this replica replicates
/// towards and the `proxy_towards_*` fields index into it (`None` meaning the
/// replica itself holds the lock or is home). When conveyed to a peer the
/// replication fields are left empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalizedNetMeshObject {
    pub identifier: NetMeshObjectIdentifier,
    pub time_created: i64,
    pub time_updated: i64,
    pub time_read: i64,
    pub time_expires: i64,
    pub entity_types: Vec<EntityTypeId>,
    pub properties: Vec<(PropertyTypeId, PropertyValue)>,
    pub neighbors: Vec<ExternalizedNeighbor>,
    pub equivalents: Vec<NetMeshObjectIdentifier>,
    #[serde(default)]
    pub proxies: Vec<NetMeshBaseIdentifier>,
    #[serde(default)]
    pub proxy_towards_home: Option<usize>,
    #[serde(default)]
    pub proxy_towards_lock: Option<usize>,
    pub will_give_up_lock: bool,
    pub will_give_up_home: bool,
}

impl ExternalizedNetMeshObject {
    pub fn neighbor_identifiers(&self) -> impl Iterator<Item = &NetMeshObjectIdentifier> {
        self.neighbors.iter().map(|n| &n.identifier)
    }

    pub fn property_value(&self, property: &PropertyTypeId) -> Option<&PropertyValue> {
        self.properties.iter().find(|(k, _)| k == property).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encoding;

    fn sample() -> ExternalizedNetMeshObject {
        let base = NetMeshBaseIdentifier::from_external_form("http://a.example/").unwrap();
        ExternalizedNetMeshObject {
            identifier: NetMeshObjectIdentifier::new(base.clone(), "x").unwrap(),
            time_created: 1,
            time_updated: 2,
            time_read: 3,
            time_expires: -1,
            entity_types: vec!["t/Person".into()],
            properties: vec![("t/Person_Name".into(), PropertyValue::String("Ann".into()))],
            neighbors: vec![ExternalizedNeighbor {
                identifier: NetMeshObjectIdentifier::new(base.clone(), "y").unwrap(),
                role_types: vec!["r/S".into()],
                proxies: vec![],
            }],
            equivalents: vec![],
            proxies: vec![base],
            proxy_towards_home: Some(0),
            proxy_towards_lock: None,
            will_give_up_lock: true,
            will_give_up_home: false,
        }
    }

    #[test]
    fn test_survives_both_encodings() {
        for encoding in Encoding::ALL {
            let bytes = encoding.encode(&sample()).unwrap();
            let back: ExternalizedNetMeshObject = encoding.decode(&bytes).unwrap();
            assert_eq!(back, sample());
        }
    }

    #[test]
    fn test_json_without_replication_fields() {
        let mut value = serde_json::to_value(sample()).unwrap();
        let map = value.as_object_mut().unwrap();
        map.remove("proxies");
        map.remove("proxy_towards_home");
        let back: ExternalizedNetMeshObject = serde_json::from_value(value).unwrap();
        assert!(back.proxies.is_empty());
        assert_eq!(back.proxy_towards_home, None);
        assert_eq!(
            back.property_value(&"t/Person_Name".into()),
            Some(&PropertyValue::String("Ann".into()))
        );
    }
}
