// Meshbase Core — replicated object graphs between mesh bases
//
// A NetMeshBase holds NetMeshObjects. Replicas of an object may live in other
// mesh bases; proxies keep track of them and move locks and home replicas
// with the XPRISO protocol.

pub mod access;
pub mod codec;
pub mod identifier;
pub mod mesh;
pub mod meshbase;
pub mod model;
pub mod policy;
pub mod proxy;
pub mod store;
pub mod transaction;
pub mod transport;
pub mod xpriso;

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub use access::{NetAccessManager, PeerAccessList, PermissiveAccessManager};
pub use codec::{CodecError, Encoding};
pub use identifier::{IdentifierError, NetMeshBaseIdentifier, NetMeshObjectIdentifier, NetMeshObjectIdentifierFactory};
pub use mesh::{MeshObjectError, NetMeshObject};
pub use meshbase::{NetMeshBase, NetMeshBaseBuilder};
pub use model::{EntityType, EntityTypeId, ModelBase, PropertyTypeId, PropertyValue, RoleTypeId, SimpleModelBase};
pub use policy::{PeerRole, PolicyError, ProxyPolicy};
pub use proxy::{AwaitingState, CoherenceSpecification, Proxy, ProxyError, ProxyManager};
pub use store::{CachePolicy, EncryptedStore, IterableStore, MemoryStore, SledStore, Store, StoreError};
pub use transaction::{Transaction, TransactionError};
pub use transport::{LoopbackNetwork, TcpNetwork, TransportError};
pub use xpriso::{XprisoError, XprisoMessage};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshBaseError {
    #[error("Identifier error: {0}")]
    Identifier(#[from] IdentifierError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error(transparent)]
    MeshObject(#[from] MeshObjectError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Protocol error: {0}")]
    Xpriso(#[from] XprisoError),
    #[error("No proxy towards {0}")]
    UnknownPartner(NetMeshBaseIdentifier),
    #[error("No such object: {0}")]
    UnknownObject(NetMeshObjectIdentifier),
}

// ============================================================================
// TIME
// ============================================================================

/// Milliseconds since the Unix epoch, the time unit of every timestamp here.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_errors_convert() {
        let err: MeshBaseError = StoreError::KeyDoesNotExist("k".into()).into();
        assert!(matches!(err, MeshBaseError::Store(_)));
        assert_eq!(err.to_string(), "Storage error: Key does not exist: k");
    }
}
