// XprisoMessage — one batch of replication directives between two mesh bases

use super::event::{Deletion, EquivalentsChange, NeighborChange, PropertyChange, RoleChange, TypeChange};
use super::XprisoError;
use crate::identifier::{NetMeshBaseIdentifier, NetMeshObjectIdentifier};
use crate::mesh::ExternalizedNetMeshObject;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Directive lists are processed by the receiver in a fixed order, see
/// `ProxyPolicy::calculate_for_incoming_message`.
///
/// `request_id` is non-zero when the sender expects a response; the response
/// carries it back as `response_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XprisoMessage {
    pub sender: Option<NetMeshBaseIdentifier>,
    pub receiver: Option<NetMeshBaseIdentifier>,
    pub request_id: i64,
    pub response_id: i64,
    pub cease_communications: bool,

    pub conveyed_objects: Vec<ExternalizedNetMeshObject>,
    pub requested_first_time_objects: Vec<NetMeshObjectIdentifier>,
    pub requested_resynchronize_replicas: Vec<NetMeshObjectIdentifier>,
    pub requested_freshen_replicas: Vec<NetMeshObjectIdentifier>,
    pub requested_home_replicas: Vec<NetMeshObjectIdentifier>,
    pub push_home_replicas: Vec<NetMeshObjectIdentifier>,
    pub requested_lock_objects: Vec<NetMeshObjectIdentifier>,
    pub push_lock_objects: Vec<NetMeshObjectIdentifier>,
    pub reclaimed_lock_objects: Vec<NetMeshObjectIdentifier>,
    pub requested_canceled_objects: Vec<NetMeshObjectIdentifier>,

    pub property_changes: Vec<PropertyChange>,
    pub type_changes: Vec<TypeChange>,
    pub neighbor_changes: Vec<NeighborChange>,
    pub role_changes: Vec<RoleChange>,
    pub equivalent_changes: Vec<EquivalentsChange>,
    pub deletions: Vec<Deletion>,
}

impl XprisoMessage {
    pub fn new(sender: NetMeshBaseIdentifier, receiver: NetMeshBaseIdentifier) -> Self {
        Self {
            sender: Some(sender),
            receiver: Some(receiver),
            request_id: 0,
            response_id: 0,
            cease_communications: false,
            conveyed_objects: Vec::new(),
            requested_first_time_objects: Vec::new(),
            requested_resynchronize_replicas: Vec::new(),
            requested_freshen_replicas: Vec::new(),
            requested_home_replicas: Vec::new(),
            push_home_replicas: Vec::new(),
            requested_lock_objects: Vec::new(),
            push_lock_objects: Vec::new(),
            reclaimed_lock_objects: Vec::new(),
            requested_canceled_objects: Vec::new(),
            property_changes: Vec::new(),
            type_changes: Vec::new(),
            neighbor_changes: Vec::new(),
            role_changes: Vec::new(),
            equivalent_changes: Vec::new(),
            deletions: Vec::new(),
        }
    }

    /// True if the message carries no directive. Correlation ids alone do not count.
    pub fn is_empty(&self) -> bool {
        !self.cease_communications
            && self.conveyed_objects.is_empty()
            && self.requested_first_time_objects.is_empty()
            && self.requested_resynchronize_replicas.is_empty()
            && self.requested_freshen_replicas.is_empty()
            && self.requested_home_replicas.is_empty()
            && self.push_home_replicas.is_empty()
            && self.requested_lock_objects.is_empty()
            && self.push_lock_objects.is_empty()
            && self.reclaimed_lock_objects.is_empty()
            && self.requested_canceled_objects.is_empty()
            && self.property_changes.is_empty()
            && self.type_changes.is_empty()
            && self.neighbor_changes.is_empty()
            && self.role_changes.is_empty()
            && self.equivalent_changes.is_empty()
            && self.deletions.is_empty()
    }

    /// Checks the envelope of a message received by `receiver` from `sender`.
    pub fn check(&self, sender: &NetMeshBaseIdentifier, receiver: &NetMeshBaseIdentifier) -> Result<(), XprisoError> {
        match &self.sender {
            None => return Err(XprisoError::MissingSender),
            Some(s) if s != sender => {
                return Err(XprisoError::WrongSender {
                    expected: sender.clone(),
                    got: s.clone(),
                })
            }
            Some(_) => {}
        }
        match &self.receiver {
            None => Err(XprisoError::MissingReceiver),
            Some(r) if r != receiver => Err(XprisoError::WrongReceiver {
                expected: receiver.clone(),
                got: r.clone(),
            }),
            Some(_) => Ok(()),
        }
    }

    pub fn conveyed_object(&self, id: &NetMeshObjectIdentifier) -> Option<&ExternalizedNetMeshObject> {
        self.conveyed_objects.iter().find(|o| &o.identifier == id)
    }

    /// One line naming the non-empty directive lists and their sizes.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} -> {} (req {}, resp {})",
            self.sender.as_ref().map(|s| s.as_str()).unwrap_or("?"),
            self.receiver.as_ref().map(|r| r.as_str()).unwrap_or("?"),
            self.request_id,
            self.response_id
        );
        let counts = [
            ("conveyed", self.conveyed_objects.len()),
            ("firstTime", self.requested_first_time_objects.len()),
            ("resync", self.requested_resynchronize_replicas.len()),
            ("freshen", self.requested_freshen_replicas.len()),
            ("reqHome", self.requested_home_replicas.len()),
            ("pushHome", self.push_home_replicas.len()),
            ("reqLock", self.requested_lock_objects.len()),
            ("pushLock", self.push_lock_objects.len()),
            ("reclaim", self.reclaimed_lock_objects.len()),
            ("cancel", self.requested_canceled_objects.len()),
            ("props", self.property_changes.len()),
            ("types", self.type_changes.len()),
            ("neighbors", self.neighbor_changes.len()),
            ("roles", self.role_changes.len()),
            ("equivalents", self.equivalent_changes.len()),
            ("deletes", self.deletions.len()),
        ];
        for (name, count) in counts.iter().filter(|(_, c)| *c > 0) {
            let _ = write!(out, " {name}={count}");
        }
        if self.cease_communications {
            out.push_str(" cease");
        }
        out
    }
}
