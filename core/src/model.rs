// Model — type identifiers, property values and the ModelBase collaborator
//
// The schema system itself lives outside this crate. Mesh objects only need to
// resolve a type identifier to its definition when a replica is restored.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

macro_rules! type_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

type_identifier!(
    /// Identifies an EntityType, e.g. `org.example/Person`.
    EntityTypeId
);
type_identifier!(
    /// Identifies a PropertyType, e.g. `org.example/Person_Name`.
    PropertyTypeId
);
type_identifier!(
    /// Identifies one direction of a RelationshipType.
    RoleTypeId
);

/// Value of a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Blob { mime_type: String, data: Vec<u8> },
    /// Milliseconds since the epoch.
    Timestamp(i64),
    Enumerated(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Boolean(v) => write!(f, "{v}"),
            PropertyValue::Integer(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::String(v) => write!(f, "{v:?}"),
            PropertyValue::Blob { mime_type, data } => write!(f, "<{} bytes {}>", data.len(), mime_type),
            PropertyValue::Timestamp(v) => write!(f, "@{v}"),
            PropertyValue::Enumerated(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropertyType {
    pub id: PropertyTypeId,
    pub default_value: PropertyValue,
    pub optional: bool,
}

#[derive(Debug, Clone)]
pub struct EntityType {
    pub id: EntityTypeId,
    pub properties: Vec<PropertyType>,
}

impl EntityType {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: EntityTypeId::new(id),
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, id: impl Into<String>, default_value: PropertyValue, optional: bool) -> Self {
        self.properties.push(PropertyType {
            id: PropertyTypeId::new(id),
            default_value,
            optional,
        });
        self
    }

    pub fn declares(&self, property: &PropertyTypeId) -> bool {
        self.properties.iter().any(|p| &p.id == property)
    }

    pub fn mandatory_properties(&self) -> impl Iterator<Item = &PropertyType> {
        self.properties.iter().filter(|p| !p.optional)
    }
}

/// Resolves type identifiers to their definitions.
pub trait ModelBase: Send + Sync {
    fn find_entity_type(&self, id: &EntityTypeId) -> Option<Arc<EntityType>>;
}

/// ModelBase backed by an in-memory registry.
#[derive(Default)]
pub struct SimpleModelBase {
    types: RwLock<HashMap<EntityTypeId, Arc<EntityType>>>,
}

impl SimpleModelBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entity_type: EntityType) -> Arc<EntityType> {
        let entity_type = Arc::new(entity_type);
        self.types.write().insert(entity_type.id.clone(), entity_type.clone());
        entity_type
    }

    pub fn unregister(&self, id: &EntityTypeId) {
        self.types.write().remove(id);
    }
}

impl ModelBase for SimpleModelBase {
    fn find_entity_type(&self, id: &EntityTypeId) -> Option<Arc<EntityType>> {
        self.types.read().get(id).cloned()
    }
}
