//! The live network adapter: a capability interface over the emulation
//! engine.
//!
//! Nodes are addressed by their topology id, which doubles as the engine
//! handle; engine-side details (process ids, interface names) stay inside
//! the adapter and are exposed read-only through [`LiveNetwork::interfaces_of`]
//! and [`LiveNetwork::process_of`].
//!
//! Declarations made before [`LiveNetwork::build`] are only recorded;
//! `build` realizes them. After `build`, declarations take effect
//! immediately. The orchestrator is responsible for never declaring the same
//! node or link twice.

mod netns;
mod simulated;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::Result;
pub use netns::{NetnsEngine, NetnsNetwork};
pub(crate) use netns::{controller_command, datapath_for, impairment_for};
pub use simulated::{SimState, SimulatedEngine, SimulatedNetwork};

use crate::model::{Link, LinkKey, Node, NodeKind};

pub trait LiveNetwork: Send {
    /// Realize every declared node and link. Must precede any start call.
    fn build(&mut self) -> Result<()>;

    fn is_built(&self) -> bool;

    fn add_node(&mut self, node: &Node) -> Result<()>;

    fn remove_node(&mut self, id: &str) -> Result<()>;

    fn add_link(&mut self, link: &Link) -> Result<()>;

    fn remove_link(&mut self, key: &LinkKey) -> Result<()>;

    /// Re-apply shaping options on an existing link.
    fn configure_link(&mut self, link: &Link) -> Result<()>;

    /// Re-apply addressing of a host-like node.
    fn configure_host(&mut self, node: &Node) -> Result<()>;

    fn start_controller(&mut self, id: &str) -> Result<()>;

    /// Start (or restart) switch `id`, connected to `controller` or to none.
    fn start_switch(&mut self, id: &str, controller: Option<&str>) -> Result<()>;

    /// Stop every process and tear down everything realized. May block for
    /// a long time; callers bound it.
    fn stop_all(&mut self) -> Result<()>;

    /// Engine interface names of node `id`, in port order.
    fn interfaces_of(&self, id: &str) -> Vec<String>;

    /// Process backing node `id`, when the engine runs one.
    fn process_of(&self, id: &str) -> Option<u32>;
}

/// Hands out per-node port numbers for `<id>-eth<N>` interface names.
/// Switch ports count from 1 (port 0 is the bridge itself), everything
/// else from 0. The lowest free port is handed out first, so a node with
/// `n` links never uses a port above its `n`-th.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortAllocator {
    used: BTreeMap<String, BTreeSet<usize>>,
}

impl PortAllocator {
    pub const fn first_port(kind: NodeKind) -> usize {
        match kind {
            NodeKind::Switch => 1,
            _ => 0,
        }
    }

    pub fn allocate(&mut self, id: &str, kind: NodeKind) -> usize {
        let used = self.used.entry(id.to_string()).or_default();
        let port = (Self::first_port(kind)..)
            .find(|p| !used.contains(p))
            .unwrap_or_default();
        used.insert(port);
        port
    }

    pub fn release(&mut self, id: &str, port: usize) {
        if let Some(used) = self.used.get_mut(id) {
            used.remove(&port);
        }
    }

    pub fn forget(&mut self, id: &str) {
        self.used.remove(id);
    }
}

/// Source of fresh adapters. The orchestrator discards an adapter after
/// teardown and asks for a new one.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn LiveNetwork>>;

    fn kind(&self) -> EngineKind;
}

/// Which engine backs the control plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EngineKind {
    /// In-memory engine; nothing touches the host.
    #[default]
    Simulated,
    /// Linux namespaces, Open vSwitch and tc.
    Netns,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Simulated => write!(f, "simulated"),
            EngineKind::Netns => write!(f, "netns"),
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simulated" => Ok(EngineKind::Simulated),
            "netns" => Ok(EngineKind::Netns),
            _ => Err(format!("invalid engine '{s}': use simulated or netns")),
        }
    }
}

impl clap::ValueEnum for EngineKind {
    fn value_variants<'a>() -> &'a [Self] {
        &[EngineKind::Simulated, EngineKind::Netns]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            EngineKind::Simulated => Some(clap::builder::PossibleValue::new("simulated")),
            EngineKind::Netns => Some(clap::builder::PossibleValue::new("netns")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_from_str() {
        assert_eq!("netns".parse::<EngineKind>().unwrap(), EngineKind::Netns);
        assert_eq!(
            "simulated".parse::<EngineKind>().unwrap(),
            EngineKind::Simulated
        );
        assert!("mininet".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_port_allocation() {
        let mut ports = PortAllocator::default();
        assert_eq!(ports.allocate("s1", NodeKind::Switch), 1);
        assert_eq!(ports.allocate("s1", NodeKind::Switch), 2);
        assert_eq!(ports.allocate("h1", NodeKind::Host), 0);
        ports.forget("s1");
        assert_eq!(ports.allocate("s1", NodeKind::Switch), 1);
    }

    #[test]
    fn test_released_ports_are_reused() {
        let mut ports = PortAllocator::default();
        for expected in 1..=3 {
            assert_eq!(ports.allocate("s1", NodeKind::Switch), expected);
        }
        ports.release("s1", 2);
        assert_eq!(ports.allocate("s1", NodeKind::Switch), 2);
        assert_eq!(ports.allocate("s1", NodeKind::Switch), 4);

        ports.release("h1", 0);
        assert_eq!(ports.allocate("h1", NodeKind::Host), 0);
    }

    #[test]
    fn test_engine_kind_display() {
        assert_eq!(EngineKind::Netns.to_string(), "netns");
        assert_eq!(EngineKind::default().to_string(), "simulated");
    }
}
