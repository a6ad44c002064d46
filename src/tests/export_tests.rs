#![cfg(test)]

use crate::export::TopologyDocument;
use crate::model::{Nat, Router};
use crate::test_helpers::{create_test_plane, populate_star, sample_document};

#[tokio::test]
async fn test_export_then_import_reproduces_store() {
    let (plane, _engine) = create_test_plane();
    populate_star(&plane, 3).await;
    plane.create_router(Router::new("r1")).await.unwrap();
    plane.create_nat(Nat::new("nat0")).await.unwrap();
    let json = plane.export_topology().to_json();

    let (copy, _engine) = create_test_plane();
    let doc = TopologyDocument::from_json(&json).unwrap();
    copy.import_topology(doc).await.unwrap();
    assert_eq!(copy.list_topology(), plane.list_topology());
}

#[tokio::test]
async fn test_export_is_stable_across_lifecycle() {
    let (plane, _engine) = create_test_plane();
    plane.import_topology(sample_document()).await.unwrap();
    let before = plane.export_topology();

    plane.start().await.unwrap();
    assert_eq!(plane.export_topology(), before);
    plane.stop().await.unwrap();
    assert_eq!(plane.export_topology(), before);
}

#[tokio::test]
async fn test_saved_file_loads_into_another_plane() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lab.json");

    let (plane, _engine) = create_test_plane();
    plane.import_topology(sample_document()).await.unwrap();
    plane.export_topology().save(&path).unwrap();

    let (copy, engine) = create_test_plane();
    copy.import_topology(TopologyDocument::load(&path).unwrap())
        .await
        .unwrap();
    copy.start().await.unwrap();
    assert_eq!(engine.current().unwrap().links.len(), 2);
}

#[tokio::test]
async fn test_export_script_follows_store() {
    let (plane, _engine) = create_test_plane();
    plane.import_topology(sample_document()).await.unwrap();

    let script = plane.export_script().unwrap();
    assert!(script.contains("ovs-vsctl --may-exist add-br s1"));
    assert!(script.contains("ip netns add h1"));
    assert!(script.contains("ip netns add h2"));
    assert!(script.contains("delay 20ms"), "{script}");
    assert!(script.contains("ovs-vsctl set-controller s1 tcp:127.0.0.1:6653"));

    // controllers launch after the data plane exists
    let bridge = script.find("add-br s1").unwrap();
    let controller = script.find("ovs-testcontroller").unwrap();
    assert!(bridge < controller);
}
