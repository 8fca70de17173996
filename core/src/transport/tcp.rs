// TcpNetwork — length-prefixed XprisoMessage frames over tokio TCP streams
//
// Each side dials its partner's listener to send, so a pair of mesh bases uses
// two one-directional connections. Incoming frames are handed to the attached
// handler on the blocking pool, one at a time per connection.

use super::{EndpointFactory, EndpointQueue, EndpointState, MessageEndpoint, MessageHandler, TransportError};
use crate::identifier::NetMeshBaseIdentifier;
use crate::xpriso::{self, XprisoMessage};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const SCHEME: &str = "tcp";

struct Shared {
    runtime: Handle,
    handler: RwLock<Option<Weak<dyn MessageHandler>>>,
    writers: Mutex<HashMap<NetMeshBaseIdentifier, mpsc::UnboundedSender<XprisoMessage>>>,
}

#[derive(Clone)]
pub struct TcpNetwork {
    shared: Arc<Shared>,
}

impl TcpNetwork {
    pub fn new(runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                runtime,
                handler: RwLock::new(None),
                writers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Identifier under which a listener on `addr` is reachable.
    pub fn identifier_for(addr: SocketAddr) -> Result<NetMeshBaseIdentifier, TransportError> {
        NetMeshBaseIdentifier::from_external_form(&format!("{SCHEME}://{addr}"))
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    /// Socket address of a `tcp://host:port` identifier.
    pub fn address_of(partner: &NetMeshBaseIdentifier) -> Result<String, TransportError> {
        match partner.scheme() {
            Some(SCHEME) => Ok(partner.authority().trim_end_matches('/').to_string()),
            _ => Err(TransportError::UnsupportedPartner(partner.clone())),
        }
    }

    /// Starts accepting connections on `addr`; returns the local identifier.
    pub async fn bind(&self, addr: &str) -> Result<NetMeshBaseIdentifier, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local = Self::identifier_for(listener.local_addr()?)?;
        info!("Listening on {}", local);

        let shared = self.shared.clone();
        self.shared.runtime.spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("Accepted connection from {}", peer);
                        shared.runtime.spawn(read_loop(shared.clone(), stream, peer));
                    }
                    Err(e) => {
                        error!("Accept failed: {}", e);
                        break;
                    }
                }
            }
        });
        Ok(local)
    }

    fn endpoint(&self, queue: EndpointQueue) -> Result<Arc<dyn MessageEndpoint>, TransportError> {
        let address = Self::address_of(queue.partner())?;
        Ok(Arc::new(TcpEndpoint {
            queue,
            address,
            shared: self.shared.clone(),
        }))
    }
}

impl EndpointFactory for TcpNetwork {
    fn obtain_for(
        &self,
        partner: &NetMeshBaseIdentifier,
        local: &NetMeshBaseIdentifier,
    ) -> Result<Arc<dyn MessageEndpoint>, TransportError> {
        self.endpoint(EndpointQueue::new(partner.clone(), local.clone()))
    }

    fn restore(
        &self,
        partner: &NetMeshBaseIdentifier,
        local: &NetMeshBaseIdentifier,
        state: EndpointState,
    ) -> Result<Arc<dyn MessageEndpoint>, TransportError> {
        self.endpoint(EndpointQueue::restore(partner.clone(), local.clone(), state))
    }

    fn attach(&self, _local: &NetMeshBaseIdentifier, handler: Weak<dyn MessageHandler>) {
        *self.shared.handler.write() = Some(handler);
    }
}

async fn read_loop(shared: Arc<Shared>, mut stream: TcpStream, peer: SocketAddr) {
    loop {
        let mut header = [0u8; 4];
        if let Err(e) = stream.read_exact(&mut header).await {
            debug!("Connection from {} closed: {}", peer, e);
            return;
        }
        let len = match xpriso::codec::frame_len(header) {
            Ok(len) => len,
            Err(e) => {
                warn!("Dropping connection from {}: {}", peer, e);
                return;
            }
        };
        let mut payload = vec![0u8; len];
        if let Err(e) = stream.read_exact(&mut payload).await {
            warn!("Truncated frame from {}: {}", peer, e);
            return;
        }
        let message = match xpriso::decode_message(&payload) {
            Ok(message) => message,
            Err(e) => {
                error!("Cannot decode frame from {}: {}", peer, e);
                continue;
            }
        };
        let Some(from) = message.sender.clone() else {
            warn!("Dropping anonymous message from {}", peer);
            continue;
        };
        let handler = shared.handler.read().as_ref().and_then(Weak::upgrade);
        let Some(handler) = handler else {
            warn!("No handler attached, dropping message from {}", from);
            continue;
        };
        if let Err(e) = tokio::task::spawn_blocking(move || handler.message_received(&from, message)).await {
            error!("Message handler panicked: {}", e);
        }
    }
}

async fn write_loop(address: String, partner: NetMeshBaseIdentifier, mut rx: mpsc::UnboundedReceiver<XprisoMessage>) {
    let mut stream = match TcpStream::connect(&address).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Cannot connect to {}: {}", partner, e);
            return;
        }
    };
    while let Some(message) = rx.recv().await {
        let frame = match xpriso::encode_frame(&message) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Cannot encode message to {}: {}", partner, e);
                continue;
            }
        };
        if let Err(e) = stream.write_all(&frame).await {
            error!("Write to {} failed: {}", partner, e);
            return;
        }
    }
}

struct TcpEndpoint {
    queue: EndpointQueue,
    address: String,
    shared: Arc<Shared>,
}

impl TcpEndpoint {
    fn transmit(&self, messages: Vec<XprisoMessage>) -> Result<(), TransportError> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut writers = self.shared.writers.lock();
        let partner = self.queue.partner();
        let stale = writers.get(partner).map(|tx| tx.is_closed()).unwrap_or(true);
        if stale {
            let (tx, rx) = mpsc::unbounded_channel();
            self.shared
                .runtime
                .spawn(write_loop(self.address.clone(), partner.clone(), rx));
            writers.insert(partner.clone(), tx);
        }
        let tx = writers
            .get(partner)
            .ok_or_else(|| TransportError::Closed(partner.clone()))?;
        for message in messages {
            debug!("Sending {}", message.summary());
            tx.send(message).map_err(|_| TransportError::Closed(partner.clone()))?;
        }
        Ok(())
    }
}

impl MessageEndpoint for TcpEndpoint {
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
        self.shared.writers.lock().remove(self.queue.partner());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_of() {
        let partner = NetMeshBaseIdentifier::from_external_form("tcp://127.0.0.1:7420").unwrap();
        assert_eq!(TcpNetwork::address_of(&partner).unwrap(), "127.0.0.1:7420");

        let http = NetMeshBaseIdentifier::from_external_form("http://example.com/").unwrap();
        assert!(matches!(
            TcpNetwork::address_of(&http),
            Err(TransportError::UnsupportedPartner(_))
        ));
    }

    #[tokio::test]
    async fn test_bind_reports_identifier() {
        let network = TcpNetwork::new(Handle::current());
        let local = network.bind("127.0.0.1:0").await.unwrap();
        assert_eq!(local.scheme(), Some("tcp"));
        assert!(!local.authority().ends_with(":0"));
    }
}
