//! Lock and home movement between two mesh bases
//!
//! Run with: cargo test --test integration_lock_exchange

use meshbase_core::model::{EntityType, PropertyValue, SimpleModelBase};
use meshbase_core::{
    LoopbackNetwork, MeshObjectError, NetMeshBase, NetMeshBaseIdentifier, NetMeshObject, NetMeshObjectIdentifier,
    TransactionError,
};
use std::sync::Arc;

struct Pair {
    network: LoopbackNetwork,
    a: Arc<NetMeshBase>,
    b: Arc<NetMeshBase>,
    /// Created at `a`, replicated to `b`.
    original: Arc<NetMeshObject>,
}

impl Pair {
    fn new() -> Self {
        let network = LoopbackNetwork::new();
        let model = SimpleModelBase::new();
        model.register(EntityType::new("test/Note").with_property("test/Note_Text", PropertyValue::String(String::new()), false));
        let model = Arc::new(model);
        let build = |raw: &str| {
            NetMeshBase::builder(NetMeshBaseIdentifier::from_external_form(raw).unwrap())
                .model(model.clone())
                .endpoint_factory(Arc::new(network.clone()))
                .build()
                .unwrap()
        };
        let a = build("test://a");
        let b = build("test://b");

        let mut tx = a.create_transaction().unwrap();
        let id = NetMeshObjectIdentifier::new(a.identifier().clone(), "note").unwrap();
        let original = tx.create_object_with_id(id, &["test/Note".into()]).unwrap();
        tx.commit().unwrap();

        b.obtain_replica(original.identifier()).unwrap();
        network.deliver_all();
        Self { network, a, b, original }
    }

    fn replica(&self) -> Arc<NetMeshObject> {
        self.b.find(self.original.identifier()).unwrap()
    }
}

fn write(base: &NetMeshBase, object: &Arc<NetMeshObject>, text: &str) -> Result<(), TransactionError> {
    let mut tx = base.create_transaction()?;
    tx.set_property(object, &"test/Note_Text".into(), PropertyValue::String(text.into()))?;
    tx.commit()
}

fn text(object: &NetMeshObject) -> Option<PropertyValue> {
    object.property_value(&"test/Note_Text".into())
}

#[test]
fn test_replica_cannot_write_without_lock() {
    let pair = Pair::new();
    assert!(matches!(
        write(&pair.b, &pair.replica(), "x"),
        Err(TransactionError::MeshObject(MeshObjectError::DoNotHaveLock(_)))
    ));
}

#[test]
fn test_obtained_lock_moves_write_access() {
    let pair = Pair::new();
    let replica = pair.replica();

    pair.b.try_to_obtain_locks(&[replica.clone()]).unwrap();
    assert_eq!(pair.network.deliver_all(), 2);
    assert!(replica.has_lock());
    assert!(!pair.original.has_lock());
    assert!(pair.original.lock_is_towards(pair.b.identifier()));

    write(&pair.b, &replica, "from b").unwrap();
    pair.network.deliver_all();
    assert_eq!(text(&pair.original), Some(PropertyValue::String("from b".into())));

    assert!(matches!(
        write(&pair.a, &pair.original, "from a"),
        Err(TransactionError::MeshObject(MeshObjectError::DoNotHaveLock(_)))
    ));
}

#[test]
fn test_pushed_lock_is_received() {
    let pair = Pair::new();
    let replica = pair.replica();

    pair.a.try_to_push_locks(&[pair.original.clone()], pair.b.identifier()).unwrap();
    pair.network.deliver_all();
    assert!(replica.has_lock());
    assert!(!pair.original.has_lock());
    assert!(pair.b.find_proxy(pair.a.identifier()).unwrap().awaiting_objects().is_empty());
}

#[test]
fn test_forced_reclaim_is_confirmed() {
    let pair = Pair::new();
    let replica = pair.replica();
    pair.b.try_to_obtain_locks(&[replica.clone()]).unwrap();
    pair.network.deliver_all();
    assert!(replica.has_lock());

    pair.a.force_obtain_locks(&[pair.original.clone()]).unwrap();
    assert!(pair.original.has_lock());
    let proxy = pair.a.find_proxy(pair.b.identifier()).unwrap();
    assert!(proxy.awaiting(pair.original.identifier()).is_some());

    pair.network.deliver_all();
    assert!(!replica.has_lock());
    assert!(replica.lock_is_towards(pair.a.identifier()));
    assert!(pair.original.has_lock());
    assert!(proxy.awaiting(pair.original.identifier()).is_none());

    write(&pair.a, &pair.original, "mine again").unwrap();
    pair.network.deliver_all();
    assert_eq!(text(&replica), Some(PropertyValue::String("mine again".into())));
}

#[test]
fn test_exactly_one_holder_after_concurrent_reclaims() {
    let pair = Pair::new();
    let replica = pair.replica();
    pair.b.try_to_obtain_locks(&[replica.clone()]).unwrap();
    pair.network.deliver_all();

    // a takes the lock back while b pushes it back at the same time.
    pair.a.force_obtain_locks(&[pair.original.clone()]).unwrap();
    pair.b.try_to_push_locks(&[replica.clone()], pair.a.identifier()).unwrap();
    pair.network.deliver_all();

    let holders = [pair.original.has_lock(), replica.has_lock()];
    assert_eq!(holders.iter().filter(|h| **h).count(), 1);
    assert!(pair.original.has_lock());
}

#[test]
fn test_home_moves_on_request() {
    let pair = Pair::new();
    let replica = pair.replica();
    assert!(!replica.is_home_replica());

    pair.a.try_to_push_home(&[pair.original.clone()], pair.b.identifier()).unwrap();
    pair.network.deliver_all();

    assert!(replica.is_home_replica());
    assert!(pair.original.home_is_towards(pair.b.identifier()));
}

#[test]
fn test_home_request_needs_consent() {
    let pair = Pair::new();
    let replica = pair.replica();
    assert!(!pair.original.will_give_up_home());

    pair.b.try_to_obtain_home(&[replica.clone()]).unwrap();
    pair.network.deliver_all();
    assert!(!replica.is_home_replica());
    assert!(pair.original.is_home_replica());

    let mut tx = pair.a.create_transaction().unwrap();
    tx.set_will_give_up_home(&pair.original, true).unwrap();
    tx.commit().unwrap();

    pair.b.try_to_obtain_home(&[replica.clone()]).unwrap();
    pair.network.deliver_all();
    assert!(replica.is_home_replica());
    assert!(pair.original.home_is_towards(pair.b.identifier()));
}
