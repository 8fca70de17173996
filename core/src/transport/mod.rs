// Transport module — message endpoints between mesh bases

pub mod loopback;
pub mod queue;
pub mod tcp;

pub use loopback::LoopbackNetwork;
pub use queue::EndpointQueue;
pub use tcp::TcpNetwork;

use crate::identifier::NetMeshBaseIdentifier;
use crate::xpriso::{XprisoError, XprisoMessage};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("No transport reaches {0}")]
    UnsupportedPartner(NetMeshBaseIdentifier),
    #[error("No handler attached for {0}")]
    NotAttached(NetMeshBaseIdentifier),
    #[error("Endpoint towards {0} is closed")]
    Closed(NetMeshBaseIdentifier),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Protocol error: {0}")]
    Xpriso(#[from] XprisoError),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

/// Persistent part of an endpoint, carried inside an externalized proxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointState {
    pub last_sent_token: i64,
    pub last_received_token: i64,
    /// Sent messages that expected a response and have not received one.
    pub messages_last_sent: Vec<XprisoMessage>,
    /// Messages queued while the endpoint was not communicating.
    pub messages_to_send: Vec<XprisoMessage>,
}

/// One bidirectional channel towards one partner.
#[cfg_attr(test, mockall::automock)]
pub trait MessageEndpoint: Send + Sync {
    fn partner(&self) -> &NetMeshBaseIdentifier;

    /// Queues `message`; it is transmitted once the endpoint communicates.
    fn send(&self, message: XprisoMessage) -> Result<(), TransportError>;

    fn start_communicating(&self) -> Result<(), TransportError>;

    fn stop_communicating(&self);

    fn is_communicating(&self) -> bool;

    /// Token and acknowledgement bookkeeping for a message that arrived from the partner.
    fn message_received(&self, message: &XprisoMessage);

    fn state(&self) -> EndpointState;
}

/// Receives messages that arrived at a local mesh base.
pub trait MessageHandler: Send + Sync {
    fn message_received(&self, from: &NetMeshBaseIdentifier, message: XprisoMessage);
}

/// Creates and restores endpoints keyed by (partner, local) identifiers.
pub trait EndpointFactory: Send + Sync {
    fn obtain_for(
        &self,
        partner: &NetMeshBaseIdentifier,
        local: &NetMeshBaseIdentifier,
    ) -> Result<Arc<dyn MessageEndpoint>, TransportError>;

    fn restore(
        &self,
        partner: &NetMeshBaseIdentifier,
        local: &NetMeshBaseIdentifier,
        state: EndpointState,
    ) -> Result<Arc<dyn MessageEndpoint>, TransportError>;

    /// Routes messages addressed to `local` to `handler`.
    fn attach(&self, local: &NetMeshBaseIdentifier, handler: Weak<dyn MessageHandler>);
}
