// PerhapsOutgoing — an outgoing message that only exists once something is added

use super::XprisoMessage;
use crate::identifier::NetMeshBaseIdentifier;

pub struct PerhapsOutgoing {
    sender: NetMeshBaseIdentifier,
    receiver: NetMeshBaseIdentifier,
    message: Option<XprisoMessage>,
}

impl PerhapsOutgoing {
    pub fn new(sender: NetMeshBaseIdentifier, receiver: NetMeshBaseIdentifier) -> Self {
        Self {
            sender,
            receiver,
            message: None,
        }
    }

    /// The message, created on first access.
    pub fn obtain(&mut self) -> &mut XprisoMessage {
        let (sender, receiver) = (&self.sender, &self.receiver);
        self.message
            .get_or_insert_with(|| XprisoMessage::new(sender.clone(), receiver.clone()))
    }

    pub fn get(&self) -> Option<&XprisoMessage> {
        self.message.as_ref()
    }

    /// The message if it carries any directive.
    pub fn into_message(self) -> Option<XprisoMessage> {
        self.message.filter(|m| !m.is_empty())
    }
}
