//! The lifecycle orchestrator.
//!
//! [`ControlPlane`] owns the topology store, the run state and the live
//! network adapter. Every mutation holds one async lock for its whole
//! duration, adapter calls included; reads are served from a
//! [`watch`] snapshot published after each committed change.
//!
//! While stopped, mutations touch only the store and mark the adapter
//! stale; it is rebuilt from the store before the next `build`. While
//! started, mutations are mirrored on the adapter and rolled back in the
//! store if the adapter refuses them.

mod adapter;
mod hooks;
mod mutations;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
pub use hooks::{FnHook, LifecycleHook};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_BUILD_TIMEOUT_MS, DEFAULT_STOP_TIMEOUT_MS};
use crate::engine::{EngineFactory, EngineKind, LiveNetwork};
use crate::error::{Result, TopologyError};
use crate::status::NodeInterfaces;
use crate::topology::TopologyStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Stopped,
    Started,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Stopped => write!(f, "stopped"),
            RunState::Started => write!(f, "started"),
        }
    }
}

/// Bounds on adapter calls that may hang.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub build: Duration,
    pub stop: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            build: Duration::from_millis(DEFAULT_BUILD_TIMEOUT_MS),
            stop: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
        }
    }
}

/// Read-only view of the control plane after the last committed change.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub store: TopologyStore,
    pub state: RunState,
    /// The adapter does not reflect the store and will be rebuilt on start.
    pub stale: bool,
    pub started_at: Option<DateTime<Utc>>,
    /// Per-node interfaces as the adapter saw them at publish time.
    pub interfaces: Vec<NodeInterfaces>,
}

pub(crate) struct Inner {
    store: TopologyStore,
    state: RunState,
    /// Empty while no usable adapter exists.
    engine: Option<Box<dyn LiveNetwork>>,
    stale: bool,
    started_at: Option<DateTime<Utc>>,
}

impl Inner {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            store: self.store.clone(),
            state: self.state,
            stale: self.stale,
            started_at: self.started_at,
            interfaces: self.interfaces(),
        }
    }

    fn interfaces(&self) -> Vec<NodeInterfaces> {
        let engine = self.engine.as_deref();
        self.store
            .nodes()
            .iter()
            .map(|node| {
                let id = node.id();
                NodeInterfaces {
                    node_id: id.to_string(),
                    kind: node.kind(),
                    interface_names: engine.map(|e| e.interfaces_of(id)).unwrap_or_default(),
                    process_id: engine.and_then(|e| e.process_of(id)),
                }
            })
            .collect()
    }

    fn is_started(&self) -> bool {
        self.state == RunState::Started
    }
}

pub(crate) struct Shared {
    inner: Mutex<Inner>,
    snapshot: watch::Sender<Snapshot>,
    hooks: RwLock<Vec<Arc<dyn LifecycleHook>>>,
    factory: Arc<dyn EngineFactory>,
    timeouts: Timeouts,
}

/// Handle to the control plane. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ControlPlane {
    shared: Arc<Shared>,
}

impl ControlPlane {
    /// A control plane with an empty topology, stopped. The first adapter
    /// is obtained lazily on start.
    pub fn new(factory: Arc<dyn EngineFactory>, timeouts: Timeouts) -> Self {
        let inner = Inner {
            store: TopologyStore::new(),
            state: RunState::Stopped,
            engine: None,
            stale: true,
            started_at: None,
        };
        let (snapshot, _) = watch::channel(inner.snapshot());
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                snapshot,
                hooks: RwLock::new(Vec::new()),
                factory,
                timeouts,
            }),
        }
    }

    pub fn engine_kind(&self) -> EngineKind {
        self.shared.factory.kind()
    }

    pub fn timeouts(&self) -> Timeouts {
        self.shared.timeouts
    }

    // -- lock-free reads --

    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn list_topology(&self) -> TopologyStore {
        self.shared.snapshot.borrow().store.clone()
    }

    pub fn is_started(&self) -> bool {
        self.shared.snapshot.borrow().state == RunState::Started
    }

    pub fn register_hook(&self, hook: Arc<dyn LifecycleHook>) {
        debug!(hook = hook.name(), "registered lifecycle hook");
        self.shared
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    /// Interfaces and backing process of every node, as the adapter saw
    /// them after the last committed change. Nodes not realized have no
    /// interfaces.
    pub fn list_interfaces(&self) -> Vec<NodeInterfaces> {
        self.shared.snapshot.borrow().interfaces.clone()
    }

    // -- lifecycle --

    /// Materialize the stored topology and start every controller and
    /// switch. On failure the network stays stopped.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        let res = self.shared.start_locked(&mut inner).await;
        self.shared.publish(&inner);
        res
    }

    /// Tear the network down and rebuild an unstarted adapter from the
    /// store. Succeeds even if teardown times out.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        let res = self.shared.stop_locked(&mut inner).await;
        self.shared.publish(&inner);
        res
    }

    /// Stop then start, under one lock acquisition.
    pub async fn reset(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        let res = match self.shared.stop_locked(&mut inner).await {
            Ok(()) => self.shared.start_locked(&mut inner).await,
            Err(err) => Err(err),
        };
        self.shared.publish(&inner);
        res
    }

    /// Tear down without rebuild and forget the whole topology.
    pub async fn full_reset(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        if inner.is_started() {
            self.shared.run_hooks();
        }
        self.shared.teardown(&mut inner).await;
        inner.state = RunState::Stopped;
        inner.started_at = None;
        inner.store.clear();

        match self.shared.factory.create() {
            Ok(engine) => {
                inner.engine = Some(engine);
                inner.stale = false;
            }
            Err(err) => warn!(error = %format!("{err:#}"), "no fresh adapter after full reset"),
        }
        info!("full reset, topology cleared");
        self.shared.publish(&inner);
        Ok(())
    }

    /// Process-exit teardown: hooks, then a bounded teardown without
    /// rebuild. The store is kept.
    pub async fn shutdown(&self) {
        let mut inner = self.shared.inner.lock().await;
        if inner.is_started() {
            self.shared.run_hooks();
            self.shared.teardown(&mut inner).await;
            inner.state = RunState::Stopped;
            inner.started_at = None;
            info!("network shut down");
        }
        self.shared.publish(&inner);
    }
}

impl Shared {
    fn publish(&self, inner: &Inner) {
        self.snapshot.send_replace(inner.snapshot());
    }

    fn run_hooks(&self) {
        let hooks = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            debug!(hook = hook.name(), "running before-stop hook");
            hook.on_before_stop();
        }
    }

    async fn start_locked(&self, inner: &mut Inner) -> Result<()> {
        if inner.is_started() {
            return Err(TopologyError::Conflict(
                "network is already started".to_string(),
            ));
        }
        if inner.stale || inner.engine.is_none() {
            self.rebuild(inner).await?;
        }

        if let Err(err) = self.bring_up(inner).await {
            warn!(error = %err, "start failed, recycling adapter");
            self.teardown(inner).await;
            if let Err(rebuild_err) = self.rebuild(inner).await {
                warn!(error = %rebuild_err, "rebuild after failed start failed");
            }
            return Err(err);
        }

        inner.state = RunState::Started;
        inner.started_at = Some(Utc::now());
        info!(
            nodes = inner.store.node_count(),
            links = inner.store.link_count(),
            "network started"
        );
        Ok(())
    }

    async fn bring_up(&self, inner: &mut Inner) -> Result<()> {
        adapter::call_bounded(inner, "build", self.timeouts.build, |net| net.build()).await?;

        let controllers: Vec<String> = inner.store.controllers().map(|c| c.id.clone()).collect();
        let switches: Vec<(String, Option<String>)> = inner
            .store
            .switches()
            .map(|s| (s.id.clone(), s.controller_id.clone()))
            .collect();

        adapter::call(inner, "start", move |net| {
            for id in &controllers {
                net.start_controller(id)
                    .with_context(|| format!("start controller '{id}'"))?;
            }
            for (id, controller) in &switches {
                net.start_switch(id, controller.as_deref())
                    .with_context(|| format!("start switch '{id}'"))?;
            }
            Ok(())
        })
        .await
    }

    async fn stop_locked(&self, inner: &mut Inner) -> Result<()> {
        if !inner.is_started() {
            debug!("stop requested while stopped");
            return Ok(());
        }
        self.run_hooks();
        self.teardown(inner).await;
        inner.state = RunState::Stopped;
        inner.started_at = None;

        if let Err(err) = self.rebuild(inner).await {
            warn!(error = %err, "rebuild after stop failed, retrying on next start");
        }
        info!("network stopped");
        Ok(())
    }
}
