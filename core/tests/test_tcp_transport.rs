// Integration test for replication over real TCP listeners
//
// Each mesh base binds its own TcpNetwork on an ephemeral port and is named
// after the listener address.

use meshbase_core::model::{EntityType, PropertyValue, SimpleModelBase};
use meshbase_core::{NetMeshBase, NetMeshObjectIdentifier, TcpNetwork};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

async fn peer(model: &Arc<SimpleModelBase>) -> Arc<NetMeshBase> {
    let network = TcpNetwork::new(Handle::current());
    let identifier = network.bind("127.0.0.1:0").await.unwrap();
    NetMeshBase::builder(identifier)
        .model(model.clone())
        .endpoint_factory(Arc::new(network))
        .build()
        .unwrap()
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_replica_and_update_over_tcp() {
    let model = SimpleModelBase::new();
    model.register(EntityType::new("test/Note").with_property("test/Note_Text", PropertyValue::String(String::new()), false));
    let model = Arc::new(model);

    let a = peer(&model).await;
    let b = peer(&model).await;

    let mut tx = a.create_transaction().unwrap();
    let id = NetMeshObjectIdentifier::new(a.identifier().clone(), "note").unwrap();
    let original = tx.create_object_with_id(id.clone(), &["test/Note".into()]).unwrap();
    tx.set_property(&original, &"test/Note_Text".into(), PropertyValue::String("hello".into()))
        .unwrap();
    tx.commit().unwrap();

    b.obtain_replica(&id).unwrap();
    assert!(eventually(|| b.find(&id).is_some()).await, "replica never arrived");
    let replica = b.find(&id).unwrap();
    assert_eq!(
        replica.property_value(&"test/Note_Text".into()),
        Some(PropertyValue::String("hello".into()))
    );
    assert!(replica.lock_is_towards(a.identifier()));
    assert!(eventually(|| original.replicates_towards(b.identifier())).await);

    let mut tx = a.create_transaction().unwrap();
    tx.set_property(&original, &"test/Note_Text".into(), PropertyValue::String("again".into()))
        .unwrap();
    tx.commit().unwrap();

    let updated = eventually(|| {
        replica.property_value(&"test/Note_Text".into()) == Some(PropertyValue::String("again".into()))
    })
    .await;
    assert!(updated, "update never arrived");

    a.shutdown();
    b.shutdown();
}
