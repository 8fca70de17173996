// Xpriso — the replication protocol messages

pub mod codec;
pub mod event;
pub mod message;
pub mod outgoing;

pub use codec::{decode_message, encode_frame, encode_message, MAX_FRAME_SIZE};
pub use event::{
    ChangeKind, Deletion, EquivalentsChange, NeighborChange, ObjectEvent, PropertyChange, RoleChange, TypeChange,
};
pub use message::XprisoMessage;
pub use outgoing::PerhapsOutgoing;

use crate::codec::CodecError;
use crate::identifier::NetMeshBaseIdentifier;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum XprisoError {
    #[error("Message has no sender")]
    MissingSender,
    #[error("Message has no receiver")]
    MissingReceiver,
    #[error("Message from {got}, expected {expected}")]
    WrongSender {
        expected: NetMeshBaseIdentifier,
        got: NetMeshBaseIdentifier,
    },
    #[error("Message for {got}, expected {expected}")]
    WrongReceiver {
        expected: NetMeshBaseIdentifier,
        got: NetMeshBaseIdentifier,
    },
    #[error("Frame of {0} bytes exceeds the maximum")]
    TooLarge(usize),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}
