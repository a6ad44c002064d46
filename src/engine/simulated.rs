//! In-memory engine. Tracks what a real engine would have realized and
//! can be told to fail or hang on specific calls.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, bail};
use network_sim::interface_name;
use tracing::debug;

use super::{EngineFactory, EngineKind, LiveNetwork, PortAllocator};
use crate::model::{Link, LinkKey, LinkOptions, Node};

static NEXT_PID: AtomicU32 = AtomicU32::new(40_000);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything one simulated adapter instance has seen and realized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimState {
    pub built: bool,
    /// Set once `stop_all` completed on this instance.
    pub torn_down: bool,
    pub nodes: BTreeMap<String, Node>,
    pub links: BTreeMap<LinkKey, LinkOptions>,
    pub running_controllers: BTreeSet<String>,
    /// Started switches and the controller each was pointed at.
    pub started_switches: BTreeMap<String, Option<String>>,
    /// Every call in order, e.g. `add_node h1` or `start_switch s1 c0`.
    pub calls: Vec<String>,
    interfaces: BTreeMap<LinkKey, [SimEnd; 2]>,
    ports: PortAllocator,
    pids: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq)]
struct SimEnd {
    node: String,
    port: usize,
    iface: String,
}

impl SimState {
    /// Calls whose name starts with `prefix`.
    pub fn calls_to(&self, prefix: &str) -> Vec<&str> {
        self.calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .map(String::as_str)
            .collect()
    }

    /// Allocate the next port of `id` and name its interface.
    fn end_for(&mut self, id: &str) -> Result<SimEnd> {
        let kind = match self.nodes.get(id) {
            Some(node) => node.kind(),
            None => bail!("link endpoint '{id}' is not declared"),
        };
        let port = self.ports.allocate(id, kind);
        match interface_name(id, port) {
            Ok(iface) => Ok(SimEnd {
                node: id.to_string(),
                port,
                iface,
            }),
            Err(err) => {
                self.ports.release(id, port);
                Err(err)
            }
        }
    }

    fn spawn_backing_process(&mut self, node: &Node) {
        let runs_shell = node.kind().single_interface();
        if runs_shell {
            self.pids
                .insert(node.id().to_string(), NEXT_PID.fetch_add(1, Ordering::Relaxed));
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Faults {
    /// `op` fails for every id, `op:id` only for that id.
    failing: BTreeSet<String>,
    /// Same keys, but each fires once.
    failing_once: BTreeSet<String>,
    build_delay: Option<Duration>,
    stop_delay: Option<Duration>,
}

impl Faults {
    fn check(&mut self, op: &str, id: Option<&str>) -> Result<()> {
        let key = id.map(|id| format!("{op}:{id}"));
        let targeted = key.as_ref().is_some_and(|k| self.failing.contains(k));
        let once = key.as_ref().is_some_and(|k| self.failing_once.remove(k))
            || self.failing_once.remove(op);
        if targeted || once || self.failing.contains(op) {
            match id {
                Some(id) => bail!("simulated failure in {op} for '{id}'"),
                None => bail!("simulated failure in {op}"),
            }
        }
        Ok(())
    }
}

/// Factory handing out [`SimulatedNetwork`] instances that share one fault
/// plan. Cloning shares everything, so a test can keep a handle while the
/// control plane owns the factory.
#[derive(Debug, Clone, Default)]
pub struct SimulatedEngine {
    faults: Arc<Mutex<Faults>>,
    instances: Arc<Mutex<Vec<Arc<Mutex<SimState>>>>>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` fail, for one node or link endpoint id or for all.
    pub fn fail_on(&self, op: &str, id: Option<&str>) {
        let key = match id {
            Some(id) => format!("{op}:{id}"),
            None => op.to_string(),
        };
        lock(&self.faults).failing.insert(key);
    }

    /// Like [`fail_on`](Self::fail_on), but only the next matching call
    /// fails.
    pub fn fail_once(&self, op: &str, id: Option<&str>) {
        let key = match id {
            Some(id) => format!("{op}:{id}"),
            None => op.to_string(),
        };
        lock(&self.faults).failing_once.insert(key);
    }

    /// Block inside `build` for `delay`.
    pub fn hang_build(&self, delay: Duration) {
        lock(&self.faults).build_delay = Some(delay);
    }

    /// Block inside `stop_all` for `delay`.
    pub fn hang_stop(&self, delay: Duration) {
        lock(&self.faults).stop_delay = Some(delay);
    }

    pub fn clear_faults(&self) {
        *lock(&self.faults) = Faults::default();
    }

    /// Number of adapters created so far.
    pub fn instances(&self) -> usize {
        lock(&self.instances).len()
    }

    /// State of the n-th adapter created.
    pub fn instance(&self, n: usize) -> Option<SimState> {
        lock(&self.instances).get(n).map(|s| lock(s).clone())
    }

    /// State of the most recently created adapter.
    pub fn current(&self) -> Option<SimState> {
        lock(&self.instances).last().map(|s| lock(s).clone())
    }
}

impl EngineFactory for SimulatedEngine {
    fn create(&self) -> Result<Box<dyn LiveNetwork>> {
        lock(&self.faults).check("create", None)?;
        let state = Arc::new(Mutex::new(SimState::default()));
        lock(&self.instances).push(state.clone());
        Ok(Box::new(SimulatedNetwork {
            state,
            faults: self.faults.clone(),
        }))
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Simulated
    }
}

pub struct SimulatedNetwork {
    state: Arc<Mutex<SimState>>,
    faults: Arc<Mutex<Faults>>,
}

impl SimulatedNetwork {
    /// Record the call, then consult the fault plan.
    fn enter(&self, op: &str, id: Option<&str>) -> Result<MutexGuard<'_, SimState>> {
        let mut state = lock(&self.state);
        state.calls.push(match id {
            Some(id) => format!("{op} {id}"),
            None => op.to_string(),
        });
        lock(&self.faults).check(op, id)?;
        Ok(state)
    }

    fn delay(&self, pick: fn(&Faults) -> Option<Duration>) {
        let delay = pick(&lock(&self.faults));
        if let Some(delay) = delay {
            debug!(?delay, "simulated engine stalling");
            std::thread::sleep(delay);
        }
    }
}

impl LiveNetwork for SimulatedNetwork {
    fn build(&mut self) -> Result<()> {
        self.delay(|f| f.build_delay);
        let mut state = self.enter("build", None)?;
        if state.built {
            bail!("network is already built");
        }
        let nodes: Vec<Node> = state.nodes.values().cloned().collect();
        for node in &nodes {
            state.spawn_backing_process(node);
        }
        state.built = true;
        Ok(())
    }

    fn is_built(&self) -> bool {
        lock(&self.state).built
    }

    fn add_node(&mut self, node: &Node) -> Result<()> {
        let id = node.id();
        let mut state = self.enter("add_node", Some(id))?;
        if state.nodes.contains_key(id) {
            bail!("node '{id}' is already declared");
        }
        state.nodes.insert(id.to_string(), node.clone());
        if state.built {
            state.spawn_backing_process(node);
        }
        Ok(())
    }

    fn remove_node(&mut self, id: &str) -> Result<()> {
        let mut state = self.enter("remove_node", Some(id))?;
        if !state.nodes.contains_key(id) {
            bail!("node '{id}' is not declared");
        }
        if state.links.keys().any(|k| k.contains(id)) {
            bail!("node '{id}' still has links");
        }
        state.nodes.remove(id);
        state.running_controllers.remove(id);
        state.started_switches.remove(id);
        state.pids.remove(id);
        state.ports.forget(id);
        Ok(())
    }

    fn add_link(&mut self, link: &Link) -> Result<()> {
        let (a, b) = link.key.endpoints();
        let mut state = self.enter("add_link", Some(&link.key.to_string()))?;
        lock(&self.faults).check("add_link", Some(a))?;
        lock(&self.faults).check("add_link", Some(b))?;
        for id in [a, b] {
            if !state.nodes.contains_key(id) {
                bail!("link endpoint '{id}' is not declared");
            }
        }
        if state.links.contains_key(&link.key) {
            bail!("link {} is already declared", link.key);
        }
        let a_end = state.end_for(a)?;
        let b_end = match state.end_for(b) {
            Ok(end) => end,
            Err(err) => {
                state.ports.release(a, a_end.port);
                return Err(err);
            }
        };
        state.interfaces.insert(link.key.clone(), [a_end, b_end]);
        state.links.insert(link.key.clone(), link.options.clone());
        Ok(())
    }

    fn remove_link(&mut self, key: &LinkKey) -> Result<()> {
        let mut state = self.enter("remove_link", Some(&key.to_string()))?;
        if state.links.remove(key).is_none() {
            bail!("link {key} is not declared");
        }
        if let Some(ends) = state.interfaces.remove(key) {
            for end in ends {
                state.ports.release(&end.node, end.port);
            }
        }
        Ok(())
    }

    fn configure_link(&mut self, link: &Link) -> Result<()> {
        let mut state = self.enter("configure_link", Some(&link.key.to_string()))?;
        match state.links.get_mut(&link.key) {
            Some(options) => {
                *options = link.options.clone();
                Ok(())
            }
            None => bail!("link {} is not declared", link.key),
        }
    }

    fn configure_host(&mut self, node: &Node) -> Result<()> {
        let id = node.id();
        let mut state = self.enter("configure_host", Some(id))?;
        match state.nodes.get_mut(id) {
            Some(slot) => {
                *slot = node.clone();
                Ok(())
            }
            None => bail!("node '{id}' is not declared"),
        }
    }

    fn start_controller(&mut self, id: &str) -> Result<()> {
        let mut state = self.enter("start_controller", Some(id))?;
        if !state.built {
            bail!("network is not built");
        }
        let local = match state.nodes.get(id) {
            Some(Node::Controller(c)) => c.is_local(),
            _ => bail!("controller '{id}' is not declared"),
        };
        if local {
            state
                .pids
                .insert(id.to_string(), NEXT_PID.fetch_add(1, Ordering::Relaxed));
        }
        state.running_controllers.insert(id.to_string());
        Ok(())
    }

    fn start_switch(&mut self, id: &str, controller: Option<&str>) -> Result<()> {
        let call_id = match controller {
            Some(ctl) => format!("{id} {ctl}"),
            None => id.to_string(),
        };
        let mut state = self.enter("start_switch", Some(&call_id))?;
        lock(&self.faults).check("start_switch", Some(id))?;
        if !state.built {
            bail!("network is not built");
        }
        if !matches!(state.nodes.get(id), Some(Node::Switch(_))) {
            bail!("switch '{id}' is not declared");
        }
        if let Some(ctl) = controller
            && !matches!(state.nodes.get(ctl), Some(Node::Controller(_)))
        {
            bail!("controller '{ctl}' is not declared");
        }
        state
            .started_switches
            .insert(id.to_string(), controller.map(str::to_string));
        Ok(())
    }

    fn stop_all(&mut self) -> Result<()> {
        self.delay(|f| f.stop_delay);
        let mut state = self.enter("stop_all", None)?;
        state.running_controllers.clear();
        state.started_switches.clear();
        state.pids.clear();
        state.built = false;
        state.torn_down = true;
        Ok(())
    }

    fn interfaces_of(&self, id: &str) -> Vec<String> {
        let state = lock(&self.state);
        let mut ends: Vec<&SimEnd> = state
            .interfaces
            .values()
            .flatten()
            .filter(|end| end.node == id)
            .collect();
        ends.sort_by_key(|end| end.port);
        ends.into_iter().map(|end| end.iface.clone()).collect()
    }

    fn process_of(&self, id: &str) -> Option<u32> {
        lock(&self.state).pids.get(id).copied()
    }
}
