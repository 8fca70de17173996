// Mesh base lifecycle — home object, transactions, listing and shutdown

use super::NetMeshBase;
use crate::mesh::NetMeshObject;
use crate::now_millis;
use crate::proxy::Proxy;
use crate::store::StoreError;
use crate::transaction::{Transaction, TransactionError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

impl NetMeshBase {
    // ========================================================================
    // HOME OBJECT
    // ========================================================================

    /// Loads the home object, creating and storing it on first start.
    pub(crate) fn install_home_object(&self) -> Result<Arc<NetMeshObject>, StoreError> {
        let id = self.id_factory.home_object_identifier();
        if let Some(found) = self.find(&id) {
            return Ok(found);
        }
        let home = Arc::new(NetMeshObject::new_local(id.clone(), now_millis()));
        self.objects.put(id, home.clone())?;
        info!("Created home object of {}", self.identifier);
        Ok(home)
    }

    /// The object every mesh base has; it cannot be deleted.
    pub fn home_object(&self) -> Arc<NetMeshObject> {
        let id = self.id_factory.home_object_identifier();
        match self.find(&id) {
            Some(home) => home,
            None => {
                warn!("Home object of {} missing, recreating", self.identifier);
                let home = Arc::new(NetMeshObject::new_local(id.clone(), now_millis()));
                self.cache_object(&home);
                self.save_object(&home);
                home
            }
        }
    }

    // ========================================================================
    // TRANSACTIONS
    // ========================================================================

    /// Starts a transaction, failing if one is active already.
    pub fn create_transaction(&self) -> Result<Transaction<'_>, TransactionError> {
        let mut active = self.transaction_active.lock();
        if *active {
            return Err(TransactionError::ActiveAlready(self.identifier.clone()));
        }
        *active = true;
        drop(active);
        Ok(Transaction::new(self, None))
    }

    /// Starts a transaction, waiting up to the configured timeout for the
    /// active one to end.
    pub fn create_transaction_asap(&self) -> Result<Transaction<'_>, TransactionError> {
        self.begin_waiting()?;
        Ok(Transaction::new(self, None))
    }

    /// Transaction applying a message that arrived through `proxy`.
    pub(crate) fn create_incoming_transaction(&self, proxy: &Arc<Proxy>) -> Result<Transaction<'_>, TransactionError> {
        self.begin_waiting()?;
        Ok(Transaction::new(self, Some(proxy.clone())))
    }

    fn begin_waiting(&self) -> Result<(), TransactionError> {
        let deadline = Instant::now() + self.transaction_timeout;
        let mut active = self.transaction_active.lock();
        while *active {
            if self.transaction_ended.wait_until(&mut active, deadline).timed_out() && *active {
                return Err(TransactionError::TimedOut(self.identifier.clone()));
            }
        }
        *active = true;
        Ok(())
    }

    /// Flushes deferred object and proxy writes and releases the transaction
    /// slot. Returns the number of records written.
    pub(crate) fn end_transaction(&self) -> usize {
        let written = self.objects.transaction_done() + self.proxies.end_deferral();
        *self.transaction_active.lock() = false;
        self.transaction_ended.notify_one();
        written
    }

    pub fn is_transaction_active(&self) -> bool {
        *self.transaction_active.lock()
    }

    // ========================================================================
    // LISTING
    // ========================================================================

    /// Every live object, stored or only cached, ordered by identifier.
    pub fn objects(&self) -> Result<Vec<Arc<NetMeshObject>>, StoreError> {
        let mut found: BTreeMap<_, Arc<NetMeshObject>> = BTreeMap::new();
        for key in self.objects.keys()? {
            if let Some(object) = self.find(&key) {
                found.insert(key, object);
            }
        }
        for object in self.objects.cached_values() {
            if !object.is_dead() {
                found.entry(object.identifier().clone()).or_insert(object);
            }
        }
        Ok(found.into_values().collect())
    }

    /// Number of stored objects, including the home object.
    pub fn size(&self) -> Result<usize, StoreError> {
        self.objects.len()
    }

    /// Drops cache entries whose objects are no longer referenced.
    pub fn purge_reclaimed(&self) -> usize {
        let purged = self.objects.purge_reclaimed();
        debug!("Purged {} reclaimed cache entries", purged);
        purged
    }

    /// Stops all endpoints. Stored state remains for the next start.
    pub fn shutdown(&self) {
        for proxy in self.proxies() {
            proxy.stop_communicating();
            proxy.notify_updated();
        }
        info!("Mesh base {} shut down", self.identifier);
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::mesh_base;
    use crate::transaction::TransactionError;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_asap_waits_for_active_transaction() {
        let base = mesh_base("http://here.example/");
        let tx = base.create_transaction().unwrap();
        let waiter = {
            let base = Arc::clone(&base);
            thread::spawn(move || base.create_transaction_asap().map(|tx| tx.rollback()).is_ok())
        };
        thread::sleep(Duration::from_millis(50));
        tx.commit().unwrap();
        assert!(waiter.join().unwrap());
        assert!(!base.is_transaction_active());
    }

    #[test]
    fn test_asap_times_out() {
        let identifier = crate::identifier::NetMeshBaseIdentifier::from_external_form("http://here.example/").unwrap();
        let base = crate::meshbase::NetMeshBase::builder(identifier)
            .transaction_timeout(Duration::from_millis(20))
            .build()
            .unwrap();
        let _tx = base.create_transaction().unwrap();
        assert!(matches!(base.create_transaction_asap(), Err(TransactionError::TimedOut(_))));
    }

    #[test]
    fn test_objects_lists_uncommitted_creations() {
        let base = mesh_base("http://here.example/");
        let mut tx = base.create_transaction().unwrap();
        let created = tx.create_object(&[]).unwrap();
        let listed = base.objects().unwrap();
        assert!(listed.iter().any(|o| o.identifier() == created.identifier()));
        assert_eq!(base.size().unwrap(), 1);
        tx.commit().unwrap();
        assert_eq!(base.size().unwrap(), 2);
    }
}
