#![cfg(test)]

use crate::error::TopologyError;
use crate::model::{
    Controller, Host, HostPatch, LinkKey, LinkOptions, Node, Position, Switch, SwitchType,
};
use crate::test_helpers::{ProbeHook, create_test_plane, host, populate_star, sample_document};

fn shaped(delay: u32) -> LinkOptions {
    LinkOptions {
        delay: Some(delay),
        enabled: true,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Store rules through the control plane
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_link_identity_is_symmetric() {
    let (plane, _engine) = create_test_plane();
    plane.create_switch(Switch::new("s1")).await.unwrap();
    plane.create_switch(Switch::new("s2")).await.unwrap();

    plane
        .create_link("s1", "s2", LinkOptions::default())
        .await
        .unwrap();
    let err = plane
        .create_link("s2", "s1", LinkOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TopologyError::Conflict(_)));
    assert_eq!(plane.list_topology().link_count(), 1);

    // either order addresses the same link
    plane.update_link("s2", "s1", shaped(5)).await.unwrap();
    assert_eq!(plane.list_topology().link("s1", "s2"), Some(&shaped(5)));
    plane.delete_link("s2", "s1").await.unwrap();
    assert_eq!(plane.list_topology().link_count(), 0);
}

#[tokio::test]
async fn test_switch_with_unknown_controller_is_not_found() {
    let (plane, _engine) = create_test_plane();
    let err = plane
        .create_switch(Switch {
            controller_id: Some("c0".into()),
            ..Switch::new("s1")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TopologyError::NotFound(_)), "{err}");
    assert!(plane.list_topology().is_empty());
}

#[tokio::test]
async fn test_single_association() {
    let (plane, _engine) = create_test_plane();
    plane.create_controller(Controller::new("c0")).await.unwrap();
    plane
        .create_controller(Controller {
            port: 6654,
            ..Controller::new("c1")
        })
        .await
        .unwrap();
    plane.create_switch(Switch::new("s1")).await.unwrap();

    plane.associate("s1", "c0").await.unwrap();
    let err = plane.associate("s1", "c1").await.unwrap_err();
    assert!(matches!(err, TopologyError::Conflict(_)));

    let err = plane.disassociate("s1", Some("c1")).await.unwrap_err();
    assert!(matches!(err, TopologyError::Conflict(_)));

    plane.disassociate("s1", Some("c0")).await.unwrap();
    let sw = plane.associate("s1", "c1").await.unwrap();
    assert_eq!(sw.controller_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_standalone_bridge_takes_no_controller() {
    let (plane, _engine) = create_test_plane();
    plane.create_controller(Controller::new("c0")).await.unwrap();
    plane
        .create_switch(Switch {
            switch_type: SwitchType::OvsBridge,
            ..Switch::new("br0")
        })
        .await
        .unwrap();
    let err = plane.associate("br0", "c0").await.unwrap_err();
    assert!(matches!(err, TopologyError::Validation(_)));
}

#[tokio::test]
async fn test_deleting_controller_cascades() {
    let (plane, _engine) = create_test_plane();
    populate_star(&plane, 2).await;

    let removal = plane.delete_node("c0").await.unwrap();
    assert_eq!(removal.disassociated, vec!["s1".to_string()]);
    assert!(removal.links.is_empty());

    let store = plane.list_topology();
    assert!(store.controller("c0").is_none());
    assert!(store.switch("s1").unwrap().controller_id.is_none());
}

#[tokio::test]
async fn test_deleting_switch_removes_its_links() {
    let (plane, _engine) = create_test_plane();
    populate_star(&plane, 3).await;

    let removal = plane.delete_node("s1").await.unwrap();
    assert_eq!(removal.links.len(), 3);
    let store = plane.list_topology();
    assert_eq!(store.link_count(), 0);
    assert_eq!(store.hosts().count(), 3);
}

#[tokio::test]
async fn test_invalid_input_changes_nothing() {
    let (plane, _engine) = create_test_plane();
    populate_star(&plane, 1).await;
    plane.create_host(Host::new("h2")).await.unwrap();
    let before = plane.list_topology();

    let bad_loss = LinkOptions {
        loss: Some(150.0),
        ..Default::default()
    };
    let err = plane.create_link("h2", "s1", bad_loss).await.unwrap_err();
    assert!(matches!(err, TopologyError::Validation(_)));

    let bad_mac = Host {
        mac: Some("not-a-mac".into()),
        ..Host::new("h3")
    };
    let err = plane.create_host(bad_mac).await.unwrap_err();
    assert!(matches!(err, TopologyError::Validation(_)));

    let err = plane.create_link("h2", "h2", LinkOptions::default()).await.unwrap_err();
    assert!(matches!(err, TopologyError::Validation(_)));

    let err = plane.create_link("c0", "s1", LinkOptions::default()).await.unwrap_err();
    assert!(matches!(err, TopologyError::Validation(_)));

    let err = plane.delete_node("h9").await.unwrap_err();
    assert!(matches!(err, TopologyError::NotFound(_)));

    // host h1 already has its one link
    let err = plane.create_link("h1", "h2", LinkOptions::default()).await.unwrap_err();
    assert!(matches!(err, TopologyError::Conflict(_)));

    assert_eq!(plane.list_topology(), before);
}

#[tokio::test]
async fn test_ids_are_unique_across_kinds() {
    let (plane, _engine) = create_test_plane();
    plane.create_switch(Switch::new("s1")).await.unwrap();
    let err = plane.create_host(Host::new("s1")).await.unwrap_err();
    assert!(matches!(err, TopologyError::Conflict(_)));
}

#[tokio::test]
async fn test_local_controllers_cannot_share_a_socket() {
    let (plane, _engine) = create_test_plane();
    plane.create_controller(Controller::new("c0")).await.unwrap();
    let err = plane.create_controller(Controller::new("c1")).await.unwrap_err();
    assert!(matches!(err, TopologyError::Conflict(_)), "{err}");
}

#[tokio::test]
async fn test_move_node_only_changes_position() {
    let (plane, _engine) = create_test_plane();
    populate_star(&plane, 1).await;
    let node = plane.move_node("h1", Position::new(120.0, 40.0)).await.unwrap();
    assert_eq!(node.position(), Position::new(120.0, 40.0));
    assert_eq!(
        plane.list_topology().node("h1").unwrap().addressing(),
        Some((Some("10.0.0.1/24".parse().unwrap()), None))
    );
}

// ---------------------------------------------------------------------------
// Stopped: store only
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stopped_mutations_only_mark_adapter_stale() {
    let (plane, engine) = create_test_plane();
    populate_star(&plane, 1).await;
    plane.start().await.unwrap();
    plane.stop().await.unwrap();
    assert!(!plane.status().adapter_stale);
    let instances = engine.instances();

    plane.create_host(host("h2", "10.0.0.2/24")).await.unwrap();
    plane.create_link("h2", "s1", LinkOptions::default()).await.unwrap();
    assert!(plane.status().adapter_stale);
    assert!(engine.current().unwrap().calls_to("add_node h2").is_empty());
    assert_eq!(engine.instances(), instances);

    plane.start().await.unwrap();
    let sim = engine.current().unwrap();
    assert!(sim.nodes.contains_key("h2"));
    assert!(sim.links.contains_key(&LinkKey::new("h2", "s1")));
}

// ---------------------------------------------------------------------------
// Started: mirrored on the adapter, rolled back on failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_started_mutations_reach_adapter() {
    let (plane, engine) = create_test_plane();
    populate_star(&plane, 1).await;
    plane.start().await.unwrap();

    plane.create_host(host("h2", "10.0.0.2/24")).await.unwrap();
    plane.create_link("h2", "s1", shaped(10)).await.unwrap();
    plane.update_link("h2", "s1", shaped(30)).await.unwrap();

    let sim = engine.current().unwrap();
    assert!(sim.nodes.contains_key("h2"));
    assert_eq!(sim.links.get(&LinkKey::new("h2", "s1")), Some(&shaped(30)));
    assert_eq!(sim.calls_to("configure_link").len(), 1);
    assert!(!plane.status().adapter_stale);

    plane.delete_node("h2").await.unwrap();
    let sim = engine.current().unwrap();
    assert!(!sim.nodes.contains_key("h2"));
    assert!(!sim.links.contains_key(&LinkKey::new("h2", "s1")));
}

#[tokio::test]
async fn test_new_controller_and_switch_start_immediately() {
    let (plane, engine) = create_test_plane();
    populate_star(&plane, 1).await;
    plane.start().await.unwrap();

    plane
        .create_controller(Controller {
            port: 6654,
            ..Controller::new("c1")
        })
        .await
        .unwrap();
    plane
        .create_switch(Switch {
            controller_id: Some("c1".into()),
            ..Switch::new("s2")
        })
        .await
        .unwrap();

    let sim = engine.current().unwrap();
    assert!(sim.running_controllers.contains("c1"));
    assert_eq!(sim.started_switches.get("s2"), Some(&Some("c1".to_string())));
}

#[tokio::test]
async fn test_adapter_failure_rolls_back_link() {
    let (plane, engine) = create_test_plane();
    populate_star(&plane, 1).await;
    plane.create_host(Host::new("h2")).await.unwrap();
    plane.start().await.unwrap();
    let before = plane.list_topology();

    engine.fail_on("add_link", Some("h2"));
    let err = plane
        .create_link("h2", "s1", LinkOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TopologyError::Engine(_)), "{err}");
    assert_eq!(plane.list_topology(), before);
    assert!(plane.is_started());
}

#[tokio::test]
async fn test_adapter_failure_rolls_back_node() {
    let (plane, engine) = create_test_plane();
    populate_star(&plane, 1).await;
    plane.start().await.unwrap();
    let before = plane.list_topology();

    engine.fail_on("add_node", Some("h2"));
    assert!(plane.create_host(Host::new("h2")).await.is_err());
    assert_eq!(plane.list_topology(), before);

    // a switch that cannot start is taken back out of the adapter too
    engine.fail_on("start_switch", Some("s2"));
    assert!(plane.create_switch(Switch::new("s2")).await.is_err());
    assert_eq!(plane.list_topology(), before);
    assert!(!engine.current().unwrap().nodes.contains_key("s2"));
}

#[tokio::test]
async fn test_adapter_failure_rolls_back_delete() {
    let (plane, engine) = create_test_plane();
    populate_star(&plane, 2).await;
    plane.start().await.unwrap();
    let before = plane.list_topology();

    engine.fail_on("remove_node", Some("h1"));
    let err = plane.delete_node("h1").await.unwrap_err();
    assert!(matches!(err, TopologyError::Engine(_)));
    assert_eq!(plane.list_topology(), before);

    // the link taken down on the way is back on the adapter
    let sim = engine.current().unwrap();
    assert!(sim.links.contains_key(&LinkKey::new("h1", "s1")));
}

#[tokio::test]
async fn test_update_host_while_started() {
    let (plane, engine) = create_test_plane();
    populate_star(&plane, 1).await;
    plane.start().await.unwrap();

    let patch = HostPatch {
        ip: Some("10.0.0.42/24".parse().unwrap()),
        ..Default::default()
    };
    plane.update_host("h1", patch.clone()).await.unwrap();
    let sim = engine.current().unwrap();
    assert_eq!(sim.calls_to("configure_host h1").len(), 1);
    assert_eq!(sim.nodes["h1"], plane.list_topology().node("h1").unwrap());

    engine.fail_on("configure_host", None);
    let before = plane.list_topology();
    let patch = HostPatch {
        ip: Some("10.0.0.99/24".parse().unwrap()),
        ..Default::default()
    };
    assert!(plane.update_host("h1", patch).await.is_err());
    assert_eq!(plane.list_topology(), before);

    // label-only patches never reach the adapter
    let label = HostPatch {
        label: Some("web".into()),
        ..Default::default()
    };
    plane.update_host("h1", label).await.unwrap();
}

#[tokio::test]
async fn test_switch_rewiring_while_started() {
    let (plane, engine) = create_test_plane();
    populate_star(&plane, 1).await;
    plane.start().await.unwrap();

    plane.disassociate("s1", None).await.unwrap();
    assert_eq!(engine.current().unwrap().started_switches.get("s1"), Some(&None));

    plane.associate("s1", "c0").await.unwrap();
    assert_eq!(
        engine.current().unwrap().started_switches.get("s1"),
        Some(&Some("c0".to_string()))
    );

    // the datapath cannot change under a running network
    let err = plane
        .create_switch(Switch {
            controller_id: Some("c0".into()),
            switch_type: SwitchType::User,
            ..Switch::new("s1")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TopologyError::Conflict(_)));
    assert_eq!(
        plane.list_topology().switch("s1").unwrap().switch_type,
        SwitchType::Default
    );
}

#[tokio::test]
async fn test_controller_change_relaunches_and_reconnects() {
    let (plane, engine) = create_test_plane();
    populate_star(&plane, 1).await;
    plane.start().await.unwrap();

    let moved = Controller {
        port: 6700,
        ..Controller::new("c0")
    };
    plane.create_node(Node::from(moved)).await.unwrap();

    let sim = engine.current().unwrap();
    assert_eq!(sim.calls_to("remove_node c0").len(), 1);
    assert_eq!(sim.calls_to("start_controller c0").len(), 2);
    assert_eq!(sim.calls_to("start_switch s1 c0").len(), 2);
    match &sim.nodes["c0"] {
        Node::Controller(c) => assert_eq!(c.port, 6700),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_relaunch_restores_previous_controller() {
    let (plane, engine) = create_test_plane();
    populate_star(&plane, 1).await;
    plane.start().await.unwrap();
    engine.fail_once("start_controller", Some("c0"));

    let moved = Controller {
        port: 6700,
        ..Controller::new("c0")
    };
    let err = plane.create_controller(moved).await.unwrap_err();
    assert!(matches!(err, TopologyError::Engine(_)), "{err}");

    assert!(plane.is_started());
    assert_eq!(plane.list_topology().controller("c0").unwrap().port, 6653);
    let sim = engine.current().unwrap();
    assert_eq!(engine.instances(), 1);
    match &sim.nodes["c0"] {
        Node::Controller(c) => assert_eq!(c.port, 6653),
        other => panic!("unexpected {other:?}"),
    }
    assert!(sim.running_controllers.contains("c0"));
    assert_eq!(sim.started_switches["s1"], Some("c0".to_string()));
    assert_eq!(sim.calls_to("start_controller c0").len(), 3);
}

#[tokio::test]
async fn test_unrecoverable_relaunch_stops_network() {
    let (plane, engine) = create_test_plane();
    populate_star(&plane, 1).await;
    plane.start().await.unwrap();
    let probe = ProbeHook::new(&engine);
    plane.register_hook(probe.clone());
    engine.fail_on("start_controller", Some("c0"));

    let moved = Controller {
        port: 6700,
        ..Controller::new("c0")
    };
    let err = plane.create_controller(moved).await.unwrap_err();
    assert!(matches!(err, TopologyError::Engine(_)), "{err}");

    // neither the old nor the new controller runs, so the plane gives up
    // the started claim and rebuilds from the restored store
    assert!(!plane.is_started());
    assert_eq!(probe.calls(), 1);
    assert_eq!(plane.list_topology().controller("c0").unwrap().port, 6653);
    assert!(engine.instance(0).unwrap().torn_down);
    let sim = engine.current().unwrap();
    assert!(!sim.built);
    match &sim.nodes["c0"] {
        Node::Controller(c) => assert_eq!(c.port, 6653),
        other => panic!("unexpected {other:?}"),
    }

    engine.clear_faults();
    plane.start().await.unwrap();
    assert!(engine.current().unwrap().running_controllers.contains("c0"));
}

#[tokio::test]
async fn test_import_needs_empty_stopped_plane() {
    let (plane, _engine) = create_test_plane();
    let (nodes, links) = plane.import_topology(sample_document()).await.unwrap();
    assert_eq!((nodes, links), (4, 2));

    let err = plane.import_topology(sample_document()).await.unwrap_err();
    assert!(matches!(err, TopologyError::Conflict(_)));

    plane.start().await.unwrap();
    plane.full_reset().await.unwrap();
    plane.start().await.unwrap();
    let err = plane.import_topology(sample_document()).await.unwrap_err();
    assert!(matches!(err, TopologyError::Conflict(_)));
}

#[tokio::test]
async fn test_import_is_all_or_nothing() {
    let (plane, _engine) = create_test_plane();
    let mut doc = sample_document();
    doc.links[1].to = "s9".into();

    let err = plane.import_topology(doc).await.unwrap_err();
    assert!(matches!(err, TopologyError::NotFound(_)));
    assert!(plane.list_topology().is_empty());
}
