// NetMeshBaseBuilder — wires stores, proxies and transports into a mesh base

use super::{NetMeshBase, NetMeshObjectMapper};
use crate::access::{NetAccessManager, PermissiveAccessManager};
use crate::codec::Encoding;
use crate::identifier::{NetMeshBaseIdentifier, NetMeshObjectIdentifierFactory};
use crate::model::{ModelBase, SimpleModelBase};
use crate::policy::PeerRole;
use crate::proxy::{CoherenceSpecification, DefaultProxyFactory, ProxyManager};
use crate::store::{CachePolicy, IterableStore, MemoryStore, SwappingMap};
use crate::transport::{EndpointFactory, MessageHandler};
use crate::MeshBaseError;
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

pub struct NetMeshBaseBuilder {
    identifier: NetMeshBaseIdentifier,
    model: Arc<dyn ModelBase>,
    access: Arc<dyn NetAccessManager>,
    endpoint_factory: Option<Arc<dyn EndpointFactory>>,
    role: PeerRole,
    default_coherence: CoherenceSpecification,
    object_store: Option<Arc<dyn IterableStore>>,
    proxy_store: Option<Arc<dyn IterableStore>>,
    cache_policy: CachePolicy,
    encoding: Encoding,
    writable: bool,
    transaction_timeout: Duration,
}

impl NetMeshBaseBuilder {
    pub fn new(identifier: NetMeshBaseIdentifier) -> Self {
        Self {
            identifier,
            model: Arc::new(SimpleModelBase::new()),
            access: Arc::new(PermissiveAccessManager),
            endpoint_factory: None,
            role: PeerRole::FullDuplex,
            default_coherence: CoherenceSpecification::OneTimeOnly,
            object_store: None,
            proxy_store: None,
            cache_policy: CachePolicy::default(),
            encoding: Encoding::default(),
            writable: true,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
        }
    }

    pub fn model(mut self, model: Arc<dyn ModelBase>) -> Self {
        self.model = model;
        self
    }

    pub fn access_manager(mut self, access: Arc<dyn NetAccessManager>) -> Self {
        self.access = access;
        self
    }

    /// Without an endpoint factory every proxy is a placeholder.
    pub fn endpoint_factory(mut self, factory: Arc<dyn EndpointFactory>) -> Self {
        self.endpoint_factory = Some(factory);
        self
    }

    /// Role of proxies created towards new partners.
    pub fn role(mut self, role: PeerRole) -> Self {
        self.role = role;
        self
    }

    pub fn default_coherence(mut self, coherence: CoherenceSpecification) -> Self {
        self.default_coherence = coherence;
        self
    }

    pub fn object_store(mut self, store: Arc<dyn IterableStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn proxy_store(mut self, store: Arc<dyn IterableStore>) -> Self {
        self.proxy_store = Some(store);
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// A read-only mesh base refuses replicas offered by partners.
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Arc<NetMeshBase>, MeshBaseError> {
        let object_store = self.object_store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let proxy_store = self.proxy_store.unwrap_or_else(|| Arc::new(MemoryStore::new()));

        let factory = Arc::new(DefaultProxyFactory::new(
            self.identifier.clone(),
            self.endpoint_factory.clone(),
            self.role,
            self.default_coherence,
        ));
        let proxies = ProxyManager::new(self.identifier.clone(), factory, proxy_store);
        let mapper = NetMeshObjectMapper::new(self.model.clone(), proxies.clone()).with_encoding(self.encoding);
        let objects = SwappingMap::new(mapper, object_store, self.cache_policy);

        let base = Arc::new(NetMeshBase {
            id_factory: NetMeshObjectIdentifierFactory::new(self.identifier.clone()),
            identifier: self.identifier.clone(),
            model: self.model,
            access: self.access,
            objects,
            proxies,
            writable: self.writable,
            transaction_timeout: self.transaction_timeout,
            transaction_active: Mutex::new(false),
            transaction_ended: Condvar::new(),
        });
        base.install_home_object()?;

        if let Some(endpoints) = &self.endpoint_factory {
            let weak: Weak<NetMeshBase> = Arc::downgrade(&base);
            let handler: Weak<dyn MessageHandler> = weak;
            endpoints.attach(&self.identifier, handler);
        }
        info!(
            "Mesh base {} ready ({} role, {} stored objects)",
            self.identifier,
            self.role,
            base.size()?
        );
        Ok(base)
    }
}
