// EndpointQueue — token, acknowledgement and send-queue bookkeeping shared by transports

use super::EndpointState;
use crate::identifier::NetMeshBaseIdentifier;
use crate::xpriso::XprisoMessage;
use parking_lot::Mutex;
use std::collections::VecDeque;

struct QueueState {
    communicating: bool,
    last_sent_token: i64,
    last_received_token: i64,
    unacknowledged: Vec<XprisoMessage>,
    to_send: VecDeque<XprisoMessage>,
}

pub struct EndpointQueue {
    partner: NetMeshBaseIdentifier,
    local: NetMeshBaseIdentifier,
    state: Mutex<QueueState>,
}

impl EndpointQueue {
    pub fn new(partner: NetMeshBaseIdentifier, local: NetMeshBaseIdentifier) -> Self {
        Self::restore(partner, local, EndpointState::default())
    }

    /// Resumes from a persisted state. The endpoint starts out not communicating.
    pub fn restore(partner: NetMeshBaseIdentifier, local: NetMeshBaseIdentifier, state: EndpointState) -> Self {
        Self {
            partner,
            local,
            state: Mutex::new(QueueState {
                communicating: false,
                last_sent_token: state.last_sent_token,
                last_received_token: state.last_received_token,
                unacknowledged: state.messages_last_sent,
                to_send: state.messages_to_send.into(),
            }),
        }
    }

    pub fn partner(&self) -> &NetMeshBaseIdentifier {
        &self.partner
    }

    pub fn local(&self) -> &NetMeshBaseIdentifier {
        &self.local
    }

    /// Queues `message`; returns what must be transmitted now.
    pub fn enqueue(&self, message: XprisoMessage) -> Vec<XprisoMessage> {
        let mut state = self.state.lock();
        state.to_send.push_back(message);
        if state.communicating {
            Self::drain(&mut state)
        } else {
            Vec::new()
        }
    }

    /// Switches to communicating; returns the backlog to transmit.
    pub fn start(&self) -> Vec<XprisoMessage> {
        let mut state = self.state.lock();
        state.communicating = true;
        Self::drain(&mut state)
    }

    pub fn stop(&self) {
        self.state.lock().communicating = false;
    }

    pub fn is_communicating(&self) -> bool {
        self.state.lock().communicating
    }

    pub fn received(&self, message: &XprisoMessage) {
        let mut state = self.state.lock();
        state.last_received_token += 1;
        if message.response_id != 0 {
            state.unacknowledged.retain(|m| m.request_id != message.response_id);
        }
    }

    pub fn state(&self) -> EndpointState {
        let state = self.state.lock();
        EndpointState {
            last_sent_token: state.last_sent_token,
            last_received_token: state.last_received_token,
            messages_last_sent: state.unacknowledged.clone(),
            messages_to_send: state.to_send.iter().cloned().collect(),
        }
    }

    fn drain(state: &mut QueueState) -> Vec<XprisoMessage> {
        let mut out = Vec::with_capacity(state.to_send.len());
        while let Some(message) = state.to_send.pop_front() {
            state.last_sent_token += 1;
            if message.request_id != 0 {
                state.unacknowledged.push(message.clone());
            }
            out.push(message);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (NetMeshBaseIdentifier, NetMeshBaseIdentifier) {
        (
            NetMeshBaseIdentifier::from_external_form("test://a").unwrap(),
            NetMeshBaseIdentifier::from_external_form("test://b").unwrap(),
        )
    }

    #[test]
    fn test_queues_until_communicating() {
        let (a, b) = ids();
        let queue = EndpointQueue::new(b.clone(), a.clone());
        assert!(queue.enqueue(XprisoMessage::new(a.clone(), b.clone())).is_empty());
        assert_eq!(queue.state().messages_to_send.len(), 1);

        assert_eq!(queue.start().len(), 1);
        assert_eq!(queue.enqueue(XprisoMessage::new(a, b)).len(), 1);
        assert_eq!(queue.state().last_sent_token, 2);
        assert!(queue.state().messages_to_send.is_empty());
    }

    #[test]
    fn test_response_acknowledges_request() {
        let (a, b) = ids();
        let queue = EndpointQueue::new(b.clone(), a.clone());
        queue.start();

        let mut request = XprisoMessage::new(a.clone(), b.clone());
        request.request_id = 11;
        queue.enqueue(request);
        assert_eq!(queue.state().messages_last_sent.len(), 1);

        let mut response = XprisoMessage::new(b, a);
        response.response_id = 11;
        queue.received(&response);
        let state = queue.state();
        assert!(state.messages_last_sent.is_empty());
        assert_eq!(state.last_received_token, 1);
    }

    #[test]
    fn test_restore_keeps_backlog() {
        let (a, b) = ids();
        let state = EndpointState {
            last_sent_token: 4,
            last_received_token: 2,
            messages_last_sent: vec![],
            messages_to_send: vec![XprisoMessage::new(a.clone(), b.clone())],
        };
        let queue = EndpointQueue::restore(b, a, state);
        assert!(!queue.is_communicating());
        assert_eq!(queue.start().len(), 1);
        assert_eq!(queue.state().last_sent_token, 5);
    }
}
