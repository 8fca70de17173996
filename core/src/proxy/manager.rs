// ProxyManager — the table of proxies of one mesh base, keyed by partner
//
// Proxies are held weakly: the replicas that replicate through a proxy keep it
// alive. A proxy loaded from storage gets its manager back-reference patched in
// before any caller sees it.

use super::{Proxy, ProxyEntryMapper, ProxyError, ProxyFactory, ProxyParameters};
use crate::identifier::NetMeshBaseIdentifier;
use crate::store::{CachePolicy, IterableStore, StoreError, SwappingMap};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, info, warn};

pub struct ProxyManager {
    local: NetMeshBaseIdentifier,
    factory: Arc<dyn ProxyFactory>,
    proxies: SwappingMap<ProxyEntryMapper>,
    creation: Mutex<()>,
    deferring: AtomicBool,
    this: Weak<ProxyManager>,
}

impl ProxyManager {
    pub fn new(local: NetMeshBaseIdentifier, factory: Arc<dyn ProxyFactory>, store: Arc<dyn IterableStore>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            local,
            proxies: SwappingMap::new(ProxyEntryMapper::new(factory.clone()), store, CachePolicy::Weak),
            factory,
            creation: Mutex::new(()),
            deferring: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn local_identifier(&self) -> &NetMeshBaseIdentifier {
        &self.local
    }

    pub fn factory(&self) -> &Arc<dyn ProxyFactory> {
        &self.factory
    }

    /// Returns the proxy towards `partner`, creating and storing it on first contact.
    pub fn obtain_for(
        &self,
        partner: &NetMeshBaseIdentifier,
        parameters: &ProxyParameters,
    ) -> Result<Arc<Proxy>, ProxyError> {
        let _creating = self.creation.lock();
        if let Some(found) = self.get(partner) {
            return Ok(found);
        }
        let proxy = Arc::new(self.factory.obtain_for(partner, parameters)?);
        proxy.set_manager(self.this.clone());
        self.proxies.put(partner.clone(), proxy.clone())?;
        info!("Created {:?} proxy towards {}", proxy.role(), partner);
        Ok(proxy)
    }

    pub fn get(&self, partner: &NetMeshBaseIdentifier) -> Option<Arc<Proxy>> {
        self.proxies
            .get_with(partner, |loaded| loaded.set_manager(self.this.clone()))
    }

    /// All proxies, loading the ones only present in storage.
    pub fn proxies(&self) -> Vec<Arc<Proxy>> {
        match self.proxies.keys() {
            Ok(keys) => keys.iter().filter_map(|k| self.get(k)).collect(),
            Err(e) => {
                error!("Cannot list stored proxies: {}", e);
                self.proxies.cached_values()
            }
        }
    }

    pub fn partners(&self) -> Result<Vec<NetMeshBaseIdentifier>, StoreError> {
        self.proxies.keys()
    }

    /// Records that `proxy` changed. Written immediately unless deferred.
    pub fn proxy_updated(&self, proxy: &Arc<Proxy>) {
        if self.deferring.load(Ordering::SeqCst) {
            self.proxies.save_upon_commit(proxy.partner().clone(), proxy.clone());
        } else if let Err(e) = self.proxies.value_updated(proxy.partner(), proxy) {
            error!("Failed to persist proxy towards {}: {}", proxy.partner(), e);
        }
    }

    /// Defers proxy writes until [`Self::end_deferral`].
    pub fn begin_deferral(&self) {
        self.deferring.store(true, Ordering::SeqCst);
    }

    /// Flushes the deferred writes; returns how many were written.
    pub fn end_deferral(&self) -> usize {
        self.deferring.store(false, Ordering::SeqCst);
        self.proxies.transaction_done()
    }

    pub fn is_deferring(&self) -> bool {
        self.deferring.load(Ordering::SeqCst)
    }

    /// Forgets the proxy towards `partner`, in memory and in storage.
    pub fn remove(&self, partner: &NetMeshBaseIdentifier) -> Result<(), ProxyError> {
        let _creating = self.creation.lock();
        match self.proxies.remove(partner) {
            Ok(()) => {
                info!("Removed proxy towards {}", partner);
                Ok(())
            }
            Err(StoreError::KeyDoesNotExist(raw)) => {
                warn!("No stored proxy {} to remove", raw);
                Err(StoreError::KeyDoesNotExist(raw).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.proxies.cached_len()
    }
}
