#![cfg(any(test, feature = "test-internals"))]
#![allow(dead_code)] // Allow unused helpers - they're used by library tests but not binary tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::SimulatedEngine;
use crate::export::{LinkEntry, TopologyDocument};
use crate::lifecycle::{ControlPlane, LifecycleHook, Timeouts};
use crate::model::{Controller, Host, LinkOptions, Switch};

/// Short enough that hang tests finish quickly, long enough for a loaded CI
/// box to build a small simulated network.
pub fn test_timeouts() -> Timeouts {
    Timeouts {
        build: Duration::from_secs(2),
        stop: Duration::from_millis(200),
    }
}

/// A control plane over a fresh simulated engine. The returned engine
/// handle shares the fault plan and instance history with the plane.
pub fn create_test_plane() -> (ControlPlane, SimulatedEngine) {
    create_test_plane_with(test_timeouts())
}

pub fn create_test_plane_with(timeouts: Timeouts) -> (ControlPlane, SimulatedEngine) {
    let engine = SimulatedEngine::new();
    let plane = ControlPlane::new(Arc::new(engine.clone()), timeouts);
    (plane, engine)
}

pub fn host(id: &str, ip: &str) -> Host {
    Host {
        ip: Some(ip.parse().unwrap()),
        ..Host::new(id)
    }
}

/// `c0` controlling `s1`, with `count` hosts `h1..` linked to `s1` and
/// addressed `10.0.0.N/24`.
pub async fn populate_star(plane: &ControlPlane, count: usize) {
    plane.create_controller(Controller::new("c0")).await.unwrap();
    plane
        .create_switch(Switch {
            controller_id: Some("c0".into()),
            ..Switch::new("s1")
        })
        .await
        .unwrap();
    for i in 1..=count {
        let id = format!("h{i}");
        plane
            .create_host(host(&id, &format!("10.0.0.{i}/24")))
            .await
            .unwrap();
        plane
            .create_link(&id, "s1", LinkOptions::default())
            .await
            .unwrap();
    }
}

/// The document form of `populate_star(plane, 2)`, with a shaped link.
pub fn sample_document() -> TopologyDocument {
    TopologyDocument {
        controllers: vec![Controller::new("c0")],
        switches: vec![Switch {
            controller_id: Some("c0".into()),
            ..Switch::new("s1")
        }],
        hosts: vec![host("h1", "10.0.0.1/24"), host("h2", "10.0.0.2/24")],
        links: vec![
            LinkEntry {
                from: "h1".into(),
                to: "s1".into(),
                options: LinkOptions {
                    bandwidth: Some(10.0),
                    delay: Some(20),
                    enabled: true,
                    ..Default::default()
                },
            },
            LinkEntry {
                from: "h2".into(),
                to: "s1".into(),
                options: LinkOptions::default(),
            },
        ],
        ..Default::default()
    }
}

/// Hook that counts its calls and records whether the simulated network
/// was still built each time it ran.
pub struct ProbeHook {
    engine: SimulatedEngine,
    calls: AtomicUsize,
    saw_built: Mutex<Vec<bool>>,
}

impl ProbeHook {
    pub fn new(engine: &SimulatedEngine) -> Arc<Self> {
        Arc::new(Self {
            engine: engine.clone(),
            calls: AtomicUsize::new(0),
            saw_built: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn saw_built(&self) -> Vec<bool> {
        self.saw_built.lock().unwrap().clone()
    }
}

impl LifecycleHook for ProbeHook {
    fn name(&self) -> &str {
        "probe"
    }

    fn on_before_stop(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let built = self.engine.current().is_some_and(|s| s.built);
        self.saw_built.lock().unwrap().push(built);
    }
}
