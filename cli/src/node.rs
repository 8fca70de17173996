// Local node — opens the configured mesh base on top of its sled database

use crate::config::Config;
use anyhow::{Context, Result};
use meshbase_core::transport::EndpointFactory;
use meshbase_core::{
    CachePolicy, EncryptedStore, EntityType, IterableStore, NetMeshBase, PropertyValue, SimpleModelBase, SledStore,
};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const OBJECTS_TREE: &str = "objects";
const PROXIES_TREE: &str = "proxies";

/// sled releases its file lock only once its background threads let go.
const OPEN_ATTEMPTS: u32 = 40;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(50);

pub struct Node {
    pub base: Arc<NetMeshBase>,
    db: sled::Db,
}

impl Node {
    pub fn open(config: &Config, endpoints: Option<Arc<dyn EndpointFactory>>) -> Result<Self> {
        let storage = config.storage_dir()?;
        Self::open_at(config, &storage, endpoints)
    }

    pub fn open_at(config: &Config, storage: &Path, endpoints: Option<Arc<dyn EndpointFactory>>) -> Result<Self> {
        let identifier = config.mesh_base_identifier()?;
        let db = open_db(storage)?;

        let objects = SledStore::with_tree(&db, OBJECTS_TREE).context("Failed to open object store")?;
        let proxies = SledStore::with_tree(&db, PROXIES_TREE).context("Failed to open proxy store")?;
        let (objects, proxies): (Arc<dyn IterableStore>, Arc<dyn IterableStore>) = match &config.passphrase {
            Some(passphrase) => {
                let salt = identifier.to_external_form();
                (
                    Arc::new(EncryptedStore::with_passphrase(objects, passphrase, salt.as_bytes())),
                    Arc::new(EncryptedStore::with_passphrase(proxies, passphrase, salt.as_bytes())),
                )
            }
            None => (Arc::new(objects), Arc::new(proxies)),
        };

        let mut builder = NetMeshBase::builder(identifier)
            .model(Arc::new(model_from(config)))
            .role(config.peer_role()?)
            .default_coherence(config.default_coherence()?)
            .object_store(objects)
            .proxy_store(proxies)
            .cache_policy(CachePolicy::soft(config.cache_capacity))
            .writable(config.writable);
        if let Some(endpoints) = endpoints {
            builder = builder.endpoint_factory(endpoints);
        }
        let base = builder.build().context("Failed to open mesh base")?;
        info!("Opened {} at {}", base.identifier(), storage.display());

        Ok(Self { base, db })
    }

    /// Stops all proxies and flushes storage.
    pub fn close(self) -> Result<()> {
        let Self { base, db } = self;
        base.shutdown();
        drop(base);
        db.flush().context("Failed to flush storage")?;
        drop(db);
        Ok(())
    }
}

fn open_db(storage: &Path) -> Result<sled::Db> {
    let mut attempt = 1;
    loop {
        match sled::open(storage) {
            Ok(db) => return Ok(db),
            Err(sled::Error::Io(e)) if attempt < OPEN_ATTEMPTS && is_lock_contention(&e) => {
                debug!("Storage at {} is still locked (attempt {})", storage.display(), attempt);
                attempt += 1;
                std::thread::sleep(OPEN_RETRY_DELAY);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open storage at {}", storage.display()));
            }
        }
    }
}

/// sled wraps a held file lock into an `Other` error.
fn is_lock_contention(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || e.to_string().contains("could not acquire lock")
}

/// Every configured property is optional and string-valued.
pub fn model_from(config: &Config) -> SimpleModelBase {
    let model = SimpleModelBase::new();
    for (entity_type, properties) in &config.types {
        let declared = properties.iter().fold(EntityType::new(entity_type.as_str()), |t, p| {
            t.with_property(p.as_str(), PropertyValue::String(String::new()), true)
        });
        model.register(declared);
    }
    model
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshbase_core::ModelBase;

    #[test]
    fn test_model_from_config() {
        let model = model_from(&Config::default());
        let note = model.find_entity_type(&"cli/Note".into()).unwrap();
        assert!(note.declares(&"cli/Note_Text".into()));
        assert_eq!(note.mandatory_properties().count(), 0);
    }

    #[test]
    fn test_open_creates_home_object_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();

        let node = Node::open_at(&config, dir.path(), None).unwrap();
        let created = node.base.home_object().time_created();
        node.close().unwrap();

        let node = Node::open_at(&config, dir.path(), None).unwrap();
        assert_eq!(node.base.size().unwrap(), 1);
        assert_eq!(node.base.home_object().time_created(), created);
        node.close().unwrap();
    }

    #[test]
    fn test_reopen_waits_for_held_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();

        let node = Node::open_at(&config, dir.path(), None).unwrap();
        let path = dir.path().to_path_buf();
        let reopen = std::thread::spawn(move || {
            let node = Node::open_at(&Config::default(), &path, None).unwrap();
            let size = node.base.size().unwrap();
            node.close().unwrap();
            size
        });
        std::thread::sleep(Duration::from_millis(200));
        node.close().unwrap();
        assert_eq!(reopen.join().unwrap(), 1);
    }

    #[test]
    fn test_lock_contention_detection() {
        let held = io::Error::other("could not acquire lock on \"db\": WouldBlock");
        assert!(is_lock_contention(&held));
        assert!(is_lock_contention(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_lock_contention(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn test_open_with_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.passphrase = Some("correct horse".to_string());

        let node = Node::open_at(&config, dir.path(), None).unwrap();
        node.close().unwrap();
        let node = Node::open_at(&config, dir.path(), None).unwrap();
        assert_eq!(node.base.size().unwrap(), 1);
        node.close().unwrap();
    }
}
