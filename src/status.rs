//! Status reporting for the console and collaborators.
//!
//! [`NetworkStatus`] is built from the published snapshot and never touches
//! the adapter. [`NodeInterfaces`] is the per-node view collaborators use to
//! find interface names and backing processes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::lifecycle::{ControlPlane, RunState, Snapshot};
use crate::model::NodeKind;

/// Run state and inventory counts.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub state: RunState,
    /// Engine backing the control plane: "simulated" or "netns"
    pub engine: String,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<i64>,
    /// True when the adapter will be rebuilt from the store before the
    /// next start.
    pub adapter_stale: bool,

    pub controllers: usize,
    pub switches: usize,
    pub hosts: usize,
    pub routers: usize,
    pub nats: usize,
    pub links: usize,
    /// Switches currently bound to a controller
    pub associated_switches: usize,
}

impl NetworkStatus {
    pub fn from_snapshot(snap: &Snapshot, engine: &str) -> Self {
        let store = &snap.store;
        Self {
            state: snap.state,
            engine: engine.to_string(),
            started_at: snap.started_at,
            uptime_secs: snap
                .started_at
                .map(|at| (Utc::now() - at).num_seconds().max(0)),
            adapter_stale: snap.stale,
            controllers: store.controllers().count(),
            switches: store.switches().count(),
            hosts: store.hosts().count(),
            routers: store.routers().count(),
            nats: store.nats().count(),
            links: store.link_count(),
            associated_switches: store
                .switches()
                .filter(|s| s.controller_id.is_some())
                .count(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// One node's engine-side view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInterfaces {
    pub node_id: String,
    pub kind: NodeKind,
    pub interface_names: Vec<String>,
    pub process_id: Option<u32>,
}

impl ControlPlane {
    pub fn status(&self) -> NetworkStatus {
        NetworkStatus::from_snapshot(&self.snapshot(), &self.engine_kind().to_string())
    }
}
