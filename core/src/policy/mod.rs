// ProxyPolicy — the replication protocol state machine
//
// A policy turns an event (incoming message, committed transaction, outbound
// request) into ProxyProcessingInstructions. It only reads state; the mesh base
// executes the instructions.

pub mod incoming;
pub mod instructions;
pub mod outbound;

pub use instructions::{ProxyProcessingInstructions, RippleInstructions};

use crate::access::NetAccessManager;
use crate::identifier::{NetMeshBaseIdentifier, NetMeshObjectIdentifier};
use crate::mesh::NetMeshObject;
use crate::proxy::Proxy;
use crate::transaction::Change;
use crate::xpriso::{
    ChangeKind, Deletion, EquivalentsChange, NeighborChange, PerhapsOutgoing, PropertyChange, RoleChange, TypeChange,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Capability set of the peer relationship a proxy speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PeerRole {
    /// Regular peer: obtains, serves, locks and homes.
    #[default]
    FullDuplex,
    /// Mirror of an external data source; never moves locks or homes itself.
    Shadow,
    /// Never communicates.
    Placeholder,
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PeerRole::FullDuplex => "full-duplex",
            PeerRole::Shadow => "shadow",
            PeerRole::Placeholder => "placeholder",
        })
    }
}

impl std::str::FromStr for PeerRole {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "full-duplex" => Ok(PeerRole::FullDuplex),
            "shadow" => Ok(PeerRole::Shadow),
            "placeholder" => Ok(PeerRole::Placeholder),
            other => Err(PolicyError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("A {role} proxy does not support {operation}")]
    Unsupported { role: PeerRole, operation: &'static str },
    #[error("Unknown peer role: {0}")]
    UnknownRole(String),
}

/// Read access to the local mesh base, as needed by a policy.
pub trait ReplicaContext {
    fn local_identifier(&self) -> &NetMeshBaseIdentifier;

    fn find_replica(&self, id: &NetMeshObjectIdentifier) -> Option<Arc<NetMeshObject>>;

    fn access_manager(&self) -> &dyn NetAccessManager;

    /// May local replicas be created on behalf of partners?
    fn is_writable(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyPolicy {
    role: PeerRole,
}

impl ProxyPolicy {
    pub fn new(role: PeerRole) -> Self {
        Self { role }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub(crate) fn unsupported(&self, operation: &'static str) -> PolicyError {
        PolicyError::Unsupported {
            role: self.role,
            operation,
        }
    }

    fn outgoing(proxy: &Proxy) -> PerhapsOutgoing {
        PerhapsOutgoing::new(proxy.local_identifier().clone(), proxy.partner().clone())
    }

    /// Describes the committed `changes` to the partner behind `proxy`.
    ///
    /// Only changes to objects replicating through `proxy`, and visible to the
    /// partner, are included.
    pub fn calculate_for_transaction_committed(
        &self,
        changes: &[Change],
        proxy: &Arc<Proxy>,
        ctx: &dyn ReplicaContext,
    ) -> Result<ProxyProcessingInstructions, PolicyError> {
        let mut ret = ProxyProcessingInstructions::new();
        if self.role == PeerRole::Placeholder {
            return Ok(ret);
        }
        let partner = proxy.partner();
        let access = ctx.access_manager();
        let mut out = Self::outgoing(proxy);

        for change in changes {
            let replicates = change.proxies().iter().any(|p| p.partner() == partner);
            if !replicates || !access.can_see(partner, change.identifier()) {
                continue;
            }
            let object = change.identifier().clone();
            match change {
                Change::Created { .. } => {}
                Change::Deleted { time, .. } => out.obtain().deletions.push(Deletion {
                    object,
                    time_updated: *time,
                }),
                Change::PropertyChanged { property, new, time, .. } => {
                    out.obtain().property_changes.push(PropertyChange {
                        object,
                        property: property.clone(),
                        value: new.clone(),
                        time_updated: *time,
                    })
                }
                Change::TypesAdded { types, time, .. } | Change::TypesRemoved { types, time, .. } => {
                    out.obtain().type_changes.push(TypeChange {
                        object,
                        kind: kind_of(matches!(change, Change::TypesAdded { .. })),
                        types: types.clone(),
                        time_updated: *time,
                    })
                }
                Change::NeighborAdded {
                    neighbor,
                    role_types,
                    time,
                    ..
                } => out.obtain().neighbor_changes.push(NeighborChange {
                    object,
                    kind: ChangeKind::Added,
                    neighbor: neighbor.clone(),
                    role_types: role_types.clone(),
                    time_updated: *time,
                }),
                Change::NeighborRemoved { removed, time, .. } => out.obtain().neighbor_changes.push(NeighborChange {
                    object,
                    kind: ChangeKind::Removed,
                    neighbor: removed.identifier.clone(),
                    role_types: removed.role_types.iter().cloned().collect(),
                    time_updated: *time,
                }),
                Change::RolesAdded {
                    neighbor,
                    role_types,
                    time,
                    ..
                }
                | Change::RolesRemoved {
                    neighbor,
                    role_types,
                    time,
                    ..
                } => out.obtain().role_changes.push(RoleChange {
                    object,
                    kind: kind_of(matches!(change, Change::RolesAdded { .. })),
                    neighbor: neighbor.clone(),
                    role_types: role_types.clone(),
                    time_updated: *time,
                }),
                Change::EquivalentsAdded { equivalents, time, .. }
                | Change::EquivalentsRemoved { equivalents, time, .. } => {
                    out.obtain().equivalent_changes.push(EquivalentsChange {
                        object,
                        kind: kind_of(matches!(change, Change::EquivalentsAdded { .. })),
                        equivalents: equivalents.clone(),
                        time_updated: *time,
                    })
                }
            }
        }

        if let Some(message) = out.into_message() {
            ret.send_via_endpoint = Some(message);
            ret.start_communicating = true;
        }
        Ok(ret)
    }
}

fn kind_of(added: bool) -> ChangeKind {
    if added {
        ChangeKind::Added
    } else {
        ChangeKind::Removed
    }
}


#[cfg(test)]
mod tests {
    use super::testing::TestContext;
    use super::*;
    use crate::access::PeerAccessList;
    use crate::proxy::testing::{local, proxy_with};
    use crate::transport::MockMessageEndpoint;

    fn partner() -> NetMeshBaseIdentifier {
        NetMeshBaseIdentifier::from_external_form("http://there.example/").unwrap()
    }

    fn object(ctx: &TestContext, local_id: &str) -> Arc<NetMeshObject> {
        ctx.add(NetMeshObject::new_local(
            NetMeshObjectIdentifier::new(local(), local_id).unwrap(),
            1,
        ))
    }

    #[test]
    fn test_role_names() {
        for role in [PeerRole::FullDuplex, PeerRole::Shadow, PeerRole::Placeholder] {
            assert_eq!(role.to_string().parse::<PeerRole>(), Ok(role));
        }
        assert!("peer".parse::<PeerRole>().is_err());
    }

    #[test]
    fn test_committed_changes_only_for_replicated_objects() {
        let ctx = TestContext::new(local());
        let proxy = proxy_with(partner(), Arc::new(MockMessageEndpoint::new()), PeerRole::FullDuplex);
        let shared = object(&ctx, "shared");
        let private = object(&ctx, "private");
        shared.register_replication_towards(&proxy);

        let changes = vec![
            Change::PropertyChanged {
                object: shared.clone(),
                property: "t/P".into(),
                old: None,
                new: Some(crate::model::PropertyValue::Integer(1)),
                time: 5,
            },
            Change::TypesAdded {
                object: private,
                types: vec!["t/T".into()],
                time: 5,
            },
            Change::RolesRemoved {
                object: shared.clone(),
                neighbor: NetMeshObjectIdentifier::new(local(), "n").unwrap(),
                role_types: vec!["r/S".into()],
                time: 6,
            },
        ];

        let ret = ProxyPolicy::new(PeerRole::FullDuplex)
            .calculate_for_transaction_committed(&changes, &proxy, &ctx)
            .unwrap();
        let message = ret.send_via_endpoint.unwrap();
        assert!(ret.start_communicating);
        assert_eq!(message.property_changes.len(), 1);
        assert!(message.type_changes.is_empty());
        assert_eq!(message.role_changes[0].kind, ChangeKind::Removed);
        assert_eq!(message.receiver, Some(partner()));
    }

    #[test]
    fn test_committed_changes_filtered_by_access() {
        let mut ctx = TestContext::new(local());
        let hidden = NetMeshObjectIdentifier::new(local(), "hidden").unwrap();
        let access = PeerAccessList::new();
        access.hide(hidden.clone());
        ctx.access = Box::new(access);

        let proxy = proxy_with(partner(), Arc::new(MockMessageEndpoint::new()), PeerRole::FullDuplex);
        let object = ctx.add(NetMeshObject::new_local(hidden, 1));
        object.register_replication_towards(&proxy);
        let changes = vec![Change::TypesAdded {
            object,
            types: vec!["t/T".into()],
            time: 5,
        }];

        let ret = ProxyPolicy::new(PeerRole::FullDuplex)
            .calculate_for_transaction_committed(&changes, &proxy, &ctx)
            .unwrap();
        assert!(ret.is_empty());
    }

    #[test]
    fn test_deletion_uses_captured_proxies() {
        let ctx = TestContext::new(local());
        let proxy = proxy_with(partner(), Arc::new(MockMessageEndpoint::new()), PeerRole::FullDuplex);
        let gone = object(&ctx, "gone");
        let changes = vec![Change::Deleted {
            object: gone,
            proxies: vec![proxy.clone()],
            time: 9,
        }];
        let ret = ProxyPolicy::new(PeerRole::Shadow)
            .calculate_for_transaction_committed(&changes, &proxy, &ctx)
            .unwrap();
        assert_eq!(ret.send_via_endpoint.unwrap().deletions[0].time_updated, 9);
    }

    #[test]
    fn test_placeholder_commit_is_empty() {
        let ctx = TestContext::new(local());
        let proxy = proxy_with(partner(), Arc::new(MockMessageEndpoint::new()), PeerRole::Placeholder);
        let shared = object(&ctx, "shared");
        shared.register_replication_towards(&proxy);
        let changes = vec![Change::TypesAdded {
            object: shared,
            types: vec!["t/T".into()],
            time: 5,
        }];
        let ret = ProxyPolicy::new(PeerRole::Placeholder)
            .calculate_for_transaction_committed(&changes, &proxy, &ctx)
            .unwrap();
        assert!(ret.is_empty());
    }
}
