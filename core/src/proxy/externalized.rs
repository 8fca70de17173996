// ExternalizedProxy — the persisted form of a Proxy
//
// Everything except the manager back-reference, which is re-attached on load.

use super::{AwaitingState, CoherenceSpecification};
use crate::identifier::{NetMeshBaseIdentifier, NetMeshObjectIdentifier};
use crate::policy::PeerRole;
use crate::transport::EndpointState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalizedProxy {
    pub local: NetMeshBaseIdentifier,
    pub partner: NetMeshBaseIdentifier,
    pub role: PeerRole,
    pub time_created: i64,
    pub time_updated: i64,
    pub time_read: i64,
    pub time_expires: i64,
    pub next_freshen: i64,
    pub freshen_delay: i64,
    pub coherence: CoherenceSpecification,
    pub is_placeholder: bool,
    /// Some replica's lock lies across this proxy.
    pub lock_held: bool,
    /// Some replica's home lies across this proxy.
    pub home_held: bool,
    pub locks_towards_partner: Vec<NetMeshObjectIdentifier>,
    pub homes_towards_partner: Vec<NetMeshObjectIdentifier>,
    pub awaiting: Vec<(NetMeshObjectIdentifier, AwaitingState)>,
    pub next_request_id: i64,
    pub endpoint: EndpointState,
}

impl ExternalizedProxy {
    pub fn last_sent_token(&self) -> i64 {
        self.endpoint.last_sent_token
    }

    pub fn last_received_token(&self) -> i64 {
        self.endpoint.last_received_token
    }
}
