//! Replication between mesh bases over the loopback transport
//!
//! Run with: cargo test --test integration_replication

use meshbase_core::model::{EntityType, PropertyValue, SimpleModelBase};
use meshbase_core::{LoopbackNetwork, NetMeshBase, NetMeshBaseIdentifier, NetMeshObject, NetMeshObjectIdentifier};
use std::sync::Arc;

fn model() -> Arc<SimpleModelBase> {
    let model = SimpleModelBase::new();
    model.register(EntityType::new("test/Person").with_property("test/Person_Name", PropertyValue::String("?".into()), false));
    Arc::new(model)
}

fn peer(network: &LoopbackNetwork, raw: &str, model: &Arc<SimpleModelBase>, writable: bool) -> Arc<NetMeshBase> {
    NetMeshBase::builder(NetMeshBaseIdentifier::from_external_form(raw).unwrap())
        .model(model.clone())
        .endpoint_factory(Arc::new(network.clone()))
        .writable(writable)
        .build()
        .unwrap()
}

fn person(base: &NetMeshBase, local_id: &str, name: &str) -> Arc<NetMeshObject> {
    let mut tx = base.create_transaction().unwrap();
    let id = NetMeshObjectIdentifier::new(base.identifier().clone(), local_id).unwrap();
    let object = tx.create_object_with_id(id, &["test/Person".into()]).unwrap();
    tx.set_property(&object, &"test/Person_Name".into(), PropertyValue::String(name.into()))
        .unwrap();
    tx.commit().unwrap();
    object
}

#[test]
fn test_first_replica_arrives_without_lock() {
    let network = LoopbackNetwork::new();
    let model = model();
    let a = peer(&network, "test://a", &model, true);
    let b = peer(&network, "test://b", &model, true);
    let original = person(&a, "ann", "Ann");

    b.obtain_replica(original.identifier()).unwrap();
    assert_eq!(network.deliver_all(), 2);

    let replica = b.find(original.identifier()).expect("replica created");
    assert_eq!(
        replica.property_value(&"test/Person_Name".into()),
        Some(PropertyValue::String("Ann".into()))
    );
    assert!(!replica.has_lock());
    assert!(replica.lock_is_towards(a.identifier()));
    assert!(replica.home_is_towards(a.identifier()));
    assert!(original.replicates_towards(b.identifier()));
    assert!(original.has_lock());

    let proxy = b.find_proxy(a.identifier()).unwrap();
    assert!(proxy.awaiting_objects().is_empty());
    assert!(proxy.partner_holds_lock(original.identifier()));
}

#[test]
fn test_missing_object_cancels_request() {
    let network = LoopbackNetwork::new();
    let model = model();
    let a = peer(&network, "test://a", &model, true);
    let b = peer(&network, "test://b", &model, true);

    let missing = NetMeshObjectIdentifier::new(a.identifier().clone(), "nobody").unwrap();
    b.obtain_replica(&missing).unwrap();
    network.deliver_all();

    assert!(b.find(&missing).is_none());
    assert!(b.find_proxy(a.identifier()).unwrap().awaiting(&missing).is_none());
}

#[test]
fn test_changes_by_lock_holder_reach_replicas() {
    let network = LoopbackNetwork::new();
    let model = model();
    let a = peer(&network, "test://a", &model, true);
    let b = peer(&network, "test://b", &model, true);
    let original = person(&a, "ann", "Ann");
    b.obtain_replica(original.identifier()).unwrap();
    network.deliver_all();

    let mut tx = a.create_transaction().unwrap();
    tx.set_property(&original, &"test/Person_Name".into(), PropertyValue::String("Anna".into()))
        .unwrap();
    tx.commit().unwrap();
    assert_eq!(network.deliver_all(), 1);

    let replica = b.find(original.identifier()).unwrap();
    assert_eq!(
        replica.property_value(&"test/Person_Name".into()),
        Some(PropertyValue::String("Anna".into()))
    );
}

#[test]
fn test_relationship_and_role_reach_replica() {
    let network = LoopbackNetwork::new();
    let model = model();
    let a = peer(&network, "test://a", &model, true);
    let b = peer(&network, "test://b", &model, true);
    let ann = person(&a, "ann", "Ann");
    let bob = person(&a, "bob", "Bob");
    b.obtain_replica(ann.identifier()).unwrap();
    network.deliver_all();

    let mut tx = a.create_transaction().unwrap();
    tx.relate(&ann, &bob).unwrap();
    tx.bless_role(&ann, bob.identifier(), &["test/Knows".into()]).unwrap();
    tx.commit().unwrap();
    network.deliver_all();

    let replica = b.find(ann.identifier()).unwrap();
    assert!(replica.is_related_to(bob.identifier()));
    assert!(replica.role_types(bob.identifier()).unwrap().contains(&"test/Knows".into()));
    assert!(b.find(bob.identifier()).is_none());
}

#[test]
fn test_deletion_by_home_removes_replica() {
    let network = LoopbackNetwork::new();
    let model = model();
    let a = peer(&network, "test://a", &model, true);
    let b = peer(&network, "test://b", &model, true);
    let original = person(&a, "ann", "Ann");
    b.obtain_replica(original.identifier()).unwrap();
    network.deliver_all();
    let replica = b.find(original.identifier()).unwrap();

    let mut tx = a.create_transaction().unwrap();
    tx.delete_object(&original).unwrap();
    tx.commit().unwrap();
    network.deliver_all();

    assert!(replica.is_dead());
    assert!(b.find(original.identifier()).is_none());
    assert_eq!(b.size().unwrap(), 1);
}

#[test]
fn test_read_only_peer_rejects_pushed_replica() {
    let network = LoopbackNetwork::new();
    let model = model();
    let a = peer(&network, "test://a", &model, true);
    let b = peer(&network, "test://b", &model, false);
    let original = person(&a, "ann", "Ann");

    a.try_to_push_locks(&[original.clone()], b.identifier()).unwrap();
    assert!(!original.has_lock());
    network.deliver_all();

    assert!(b.find(original.identifier()).is_none());
    assert!(original.has_lock());
    assert!(!original.replicates_towards(b.identifier()));
}

#[test]
fn test_writable_peer_accepts_pushed_replica_with_lock() {
    let network = LoopbackNetwork::new();
    let model = model();
    let a = peer(&network, "test://a", &model, true);
    let b = peer(&network, "test://b", &model, true);
    let original = person(&a, "ann", "Ann");

    a.try_to_push_locks(&[original.clone()], b.identifier()).unwrap();
    network.deliver_all();

    let replica = b.find(original.identifier()).unwrap();
    assert!(replica.has_lock());
    assert!(replica.home_is_towards(a.identifier()));
    assert!(original.lock_is_towards(b.identifier()));
}

#[test]
fn test_cancel_replica_purges_it() {
    let network = LoopbackNetwork::new();
    let model = model();
    let a = peer(&network, "test://a", &model, true);
    let b = peer(&network, "test://b", &model, true);
    let original = person(&a, "ann", "Ann");
    b.obtain_replica(original.identifier()).unwrap();
    network.deliver_all();
    let replica = b.find(original.identifier()).unwrap();

    b.cancel_replicas(&[replica.clone()], a.identifier()).unwrap();
    assert!(replica.is_dead());
    network.deliver_all();

    assert!(b.find(original.identifier()).is_none());
    assert!(!original.replicates_towards(b.identifier()));
}
