// LoopbackNetwork — deterministic in-process transport
//
// Sent messages wait in one global FIFO until the owner pumps them with
// `deliver_next`/`deliver_all`. Handlers run on the pumping thread, outside
// any network lock, so they may send further messages.

use super::{EndpointFactory, EndpointQueue, EndpointState, MessageEndpoint, MessageHandler, TransportError};
use crate::identifier::NetMeshBaseIdentifier;
use crate::xpriso::XprisoMessage;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Upper bound for one `deliver_all` call; protects against ping-pong loops.
pub const MAX_DELIVERIES: usize = 10_000;

struct InFlight {
    from: NetMeshBaseIdentifier,
    to: NetMeshBaseIdentifier,
    message: XprisoMessage,
}

#[derive(Default)]
struct Shared {
    handlers: RwLock<HashMap<NetMeshBaseIdentifier, Weak<dyn MessageHandler>>>,
    in_flight: Mutex<VecDeque<InFlight>>,
}

#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    shared: Arc<Shared>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.shared.in_flight.lock().len()
    }

    /// Delivers the oldest message; returns `false` if none was waiting.
    pub fn deliver_next(&self) -> bool {
        let Some(next) = self.shared.in_flight.lock().pop_front() else {
            return false;
        };
        let handler = self.shared.handlers.read().get(&next.to).and_then(Weak::upgrade);
        match handler {
            Some(handler) => {
                debug!("Loopback delivering {}", next.message.summary());
                handler.message_received(&next.from, next.message);
            }
            None => warn!("Loopback dropping message for unattached {}", next.to),
        }
        true
    }

    /// Delivers until the network is quiet; returns the number delivered.
    pub fn deliver_all(&self) -> usize {
        let mut delivered = 0;
        while delivered < MAX_DELIVERIES && self.deliver_next() {
            delivered += 1;
        }
        if delivered == MAX_DELIVERIES {
            warn!("Loopback stopped after {} deliveries, {} pending", delivered, self.pending());
        }
        delivered
    }

    /// Discards everything in flight; returns the number discarded.
    pub fn drop_pending(&self) -> usize {
        let mut in_flight = self.shared.in_flight.lock();
        let dropped = in_flight.len();
        in_flight.clear();
        dropped
    }

    fn endpoint(&self, queue: EndpointQueue) -> Arc<dyn MessageEndpoint> {
        Arc::new(LoopbackEndpoint {
            queue,
            network: Arc::downgrade(&self.shared),
        })
    }
}

impl EndpointFactory for LoopbackNetwork {
    fn obtain_for(
        &self,
        partner: &NetMeshBaseIdentifier,
        local: &NetMeshBaseIdentifier,
    ) -> Result<Arc<dyn MessageEndpoint>, TransportError> {
        Ok(self.endpoint(EndpointQueue::new(partner.clone(), local.clone())))
    }

    fn restore(
        &self,
        partner: &NetMeshBaseIdentifier,
        local: &NetMeshBaseIdentifier,
        state: EndpointState,
    ) -> Result<Arc<dyn MessageEndpoint>, TransportError> {
        Ok(self.endpoint(EndpointQueue::restore(partner.clone(), local.clone(), state)))
    }

    fn attach(&self, local: &NetMeshBaseIdentifier, handler: Weak<dyn MessageHandler>) {
        self.shared.handlers.write().insert(local.clone(), handler);
    }
}

struct LoopbackEndpoint {
    queue: EndpointQueue,
    network: Weak<Shared>,
}

impl LoopbackEndpoint {
    fn transmit(&self, messages: Vec<XprisoMessage>) -> Result<(), TransportError> {
        if messages.is_empty() {
            return Ok(());
        }
        let network = self
            .network
            .upgrade()
            .ok_or_else(|| TransportError::Closed(self.queue.partner().clone()))?;
        let mut in_flight = network.in_flight.lock();
        for message in messages {
            in_flight.push_back(InFlight {
                from: self.queue.local().clone(),
                to: self.queue.partner().clone(),
                message,
            });
        }
        Ok(())
    }
}

impl MessageEndpoint for LoopbackEndpoint {
    fn partner(&self) -> &NetMeshBaseIdentifier {
        self.queue.partner()
    }

    fn send(&self, message: XprisoMessage) -> Result<(), TransportError> {
        let now = self.queue.enqueue(message);
        self.transmit(now)
    }

    fn start_communicating(&self) -> Result<(), TransportError> {
        let backlog = self.queue.start();
        self.transmit(backlog)
    }

    fn stop_communicating(&self) {
        self.queue.stop();
    }

    fn is_communicating(&self) -> bool {
        self.queue.is_communicating()
    }

    fn message_received(&self, message: &XprisoMessage) {
        self.queue.received(message);
    }

    fn state(&self) -> EndpointState {
        self.queue.state()
    }
}
