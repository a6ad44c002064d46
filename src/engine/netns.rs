//! Engine backed by Linux namespaces and Open vSwitch.
//!
//! Hosts, routers and NATs each get a network namespace named after the
//! node, switches become OVS bridges, links are veth pairs named
//! `<id>-eth<N>` and shaping goes through `tc`. Controllers are launched as
//! managed processes logging into the configured directory.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use network_sim::{
    Datapath, Exec, HostNamespace, ImpairmentConfig, ManagedProcess, Namespace, OvsBridge,
    VethPair, apply_impairment, interface_name,
};
use tracing::{debug, info, warn};

use super::{EngineFactory, EngineKind, LiveNetwork, PortAllocator};
use crate::model::{
    Controller, ControllerKind, Link, LinkKey, LinkOptions, Node, NodeKind, Switch, SwitchType,
};

const CONTROLLER_GRACE: Duration = Duration::from_secs(2);
const CONTROLLER_SETTLE: Duration = Duration::from_millis(300);

/// `tc` configuration for a link's options. Disabled or unshaped links map
/// to the empty config, which clears any shaping.
pub(crate) fn impairment_for(options: &LinkOptions) -> ImpairmentConfig {
    if !options.is_shaped() {
        return ImpairmentConfig::default();
    }
    let rate_kbit = options.bandwidth.map(|mbit| (mbit * 1000.0).round() as u64);
    ImpairmentConfig {
        delay_ms: options.delay,
        jitter_ms: options.jitter,
        loss_percent: options.loss,
        rate_kbit,
        limit_packets: options.max_queue_size,
        tbf_shaping: rate_kbit.is_some(),
    }
}

pub(crate) fn datapath_for(switch_type: SwitchType) -> Datapath {
    match switch_type {
        SwitchType::User => Datapath::Userspace,
        _ => Datapath::Kernel,
    }
}

/// Binary and arguments that launch `c`, or `None` for a remote controller.
pub(crate) fn controller_command(c: &Controller) -> Option<(&'static str, Vec<String>)> {
    let port = c.port.to_string();
    match c.kind {
        _ if !c.is_local() => None,
        ControllerKind::Remote => None,
        ControllerKind::Default => Some((
            "ovs-testcontroller",
            vec![format!("ptcp:{port}:{}", c.ip)],
        )),
        ControllerKind::Ryu => Some((
            "ryu-manager",
            vec![
                "--ofp-listen-host".into(),
                c.ip.to_string(),
                "--ofp-tcp-listen-port".into(),
                port,
                format!("ryu.app.{}", c.effective_app().unwrap_or_default()),
            ],
        )),
        ControllerKind::Nox => Some((
            "nox_core",
            vec![
                "-i".into(),
                format!("ptcp:{port}"),
                c.effective_app().unwrap_or_default().to_string(),
            ],
        )),
    }
}

pub struct NetnsEngine {
    log_dir: PathBuf,
}

impl NetnsEngine {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }
}

impl EngineFactory for NetnsEngine {
    fn create(&self) -> Result<Box<dyn LiveNetwork>> {
        std::fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("create log dir {}", self.log_dir.display()))?;
        Ok(Box::new(NetnsNetwork::new(self.log_dir.clone())))
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Netns
    }
}

/// One realized link end.
#[derive(Debug, Clone)]
struct LinkEnd {
    node: String,
    port: usize,
    iface: String,
}

struct RealizedLink {
    // dropped before the namespaces holding its ends
    veth: VethPair,
    ends: [LinkEnd; 2],
}

pub struct NetnsNetwork {
    log_dir: PathBuf,
    built: bool,
    nodes: BTreeMap<String, Node>,
    links: BTreeMap<LinkKey, LinkOptions>,
    ports: PortAllocator,
    realized_links: BTreeMap<LinkKey, RealizedLink>,
    namespaces: BTreeMap<String, Namespace>,
    bridges: BTreeMap<String, OvsBridge>,
    controllers: BTreeMap<String, ManagedProcess>,
}

impl NetnsNetwork {
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            built: false,
            nodes: BTreeMap::new(),
            links: BTreeMap::new(),
            ports: PortAllocator::default(),
            realized_links: BTreeMap::new(),
            namespaces: BTreeMap::new(),
            bridges: BTreeMap::new(),
            controllers: BTreeMap::new(),
        }
    }

    fn realize_node(&mut self, node: &Node) -> Result<()> {
        match node {
            Node::Controller(_) => {}
            Node::Switch(sw) => {
                let bridge = realize_switch(sw)?;
                self.bridges.insert(sw.id.clone(), bridge);
            }
            Node::Host(_) | Node::Router(_) | Node::Nat(_) => {
                let ns = Namespace::new(node.id())?;
                if matches!(node.kind(), NodeKind::Router | NodeKind::Nat) {
                    ns.enable_forwarding()?;
                }
                self.namespaces.insert(node.id().to_string(), ns);
            }
        }
        Ok(())
    }

    fn realize_link(&mut self, key: &LinkKey, options: &LinkOptions) -> Result<()> {
        let (a, b) = key.endpoints();
        let a_end = self.allocate_end(a)?;
        let b_end = match self.allocate_end(b) {
            Ok(end) => end,
            Err(err) => {
                self.ports.release(a, a_end.port);
                return Err(err);
            }
        };
        let ends = [a_end, b_end];

        match self.wire(&ends, options) {
            Ok(veth) => {
                debug!(link = %key, "realized link");
                self.realized_links
                    .insert(key.clone(), RealizedLink { veth, ends });
                Ok(())
            }
            Err(err) => {
                for end in &ends {
                    self.ports.release(&end.node, end.port);
                }
                Err(err)
            }
        }
    }

    fn allocate_end(&mut self, id: &str) -> Result<LinkEnd> {
        let kind = self
            .nodes
            .get(id)
            .map(Node::kind)
            .with_context(|| format!("link endpoint '{id}' is not declared"))?;
        let port = self.ports.allocate(id, kind);
        match interface_name(id, port) {
            Ok(iface) => Ok(LinkEnd {
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

    /// Create the veth pair, attach both ends and shape them. The pair is
    /// deleted again if any step fails.
    fn wire(&self, ends: &[LinkEnd; 2], options: &LinkOptions) -> Result<VethPair> {
        let veth = VethPair::create(&ends[0].iface, &ends[1].iface)?;
        for end in ends {
            self.attach(&veth, end)?;
        }
        self.shape(ends, options)?;
        Ok(veth)
    }

    fn attach(&self, veth: &VethPair, end: &LinkEnd) -> Result<()> {
        if let Some(bridge) = self.bridges.get(&end.node) {
            return bridge.add_port(&end.iface);
        }
        let ns = self
            .namespaces
            .get(&end.node)
            .with_context(|| format!("node '{}' has no namespace", end.node))?;
        veth.move_into(&end.iface, ns)?;

        let node = self.nodes.get(&end.node);
        let (ip, mac) = node.and_then(Node::addressing).unwrap_or((None, None));
        if let Some(mac) = mac {
            ns.set_mac(&end.iface, mac)?;
        }
        let addr = ip.map(|ip| ip.to_string());
        ns.configure_interface(&end.iface, addr.as_deref())?;
        if node.map(Node::kind) == Some(NodeKind::Nat) {
            ns.enable_masquerade(&end.iface)?;
        }
        Ok(())
    }

    fn exec_target(&self, node: &str) -> &dyn Exec {
        match self.namespaces.get(node) {
            Some(ns) => ns as &dyn Exec,
            None => &HostNamespace,
        }
    }

    /// Shape a freshly realized link.
    fn shape(&self, ends: &[LinkEnd], options: &LinkOptions) -> Result<()> {
        let config = impairment_for(options);
        if config.is_empty() {
            return Ok(());
        }
        for end in ends {
            apply_impairment(self.exec_target(&end.node), &end.iface, &config)?;
        }
        Ok(())
    }

    fn require_built(&self) -> Result<()> {
        if !self.built {
            bail!("network is not built");
        }
        Ok(())
    }

    fn interface_of(&self, id: &str) -> Option<&str> {
        self.realized_links
            .values()
            .flat_map(|l| l.ends.iter())
            .find(|end| end.node == id)
            .map(|end| end.iface.as_str())
    }

    fn stop_controller(&mut self, id: &str) {
        if let Some(mut proc) = self.controllers.remove(id) {
            debug!(controller = id, pid = proc.pid(), "stopping controller");
            proc.kill(CONTROLLER_GRACE);
        }
    }
}

fn realize_switch(sw: &Switch) -> Result<OvsBridge> {
    let standalone = sw.switch_type.standalone();
    let bridge = OvsBridge::new(&sw.id, datapath_for(sw.switch_type), standalone)?;
    if let Some(proto) = &sw.protocol {
        bridge.set_protocols(proto)?;
    }
    Ok(bridge)
}

impl LiveNetwork for NetnsNetwork {
    fn build(&mut self) -> Result<()> {
        if self.built {
            bail!("network is already built");
        }
        let nodes: Vec<Node> = self.nodes.values().cloned().collect();
        for node in nodes
            .iter()
            .filter(|n| n.kind() == NodeKind::Switch)
            .chain(nodes.iter().filter(|n| n.kind() != NodeKind::Switch))
        {
            self.realize_node(node)
                .with_context(|| format!("build node '{}'", node.id()))?;
        }

        let links: Vec<(LinkKey, LinkOptions)> =
            self.links.iter().map(|(k, o)| (k.clone(), o.clone())).collect();
        for (key, options) in &links {
            self.realize_link(key, options)
                .with_context(|| format!("build link {key}"))?;
        }

        self.built = true;
        info!(
            nodes = self.nodes.len(),
            links = self.links.len(),
            "network built"
        );
        Ok(())
    }

    fn is_built(&self) -> bool {
        self.built
    }

    fn add_node(&mut self, node: &Node) -> Result<()> {
        let id = node.id();
        if self.nodes.contains_key(id) {
            bail!("node '{id}' is already declared");
        }
        if self.built {
            self.realize_node(node)
                .with_context(|| format!("add node '{id}'"))?;
        }
        self.nodes.insert(id.to_string(), node.clone());
        Ok(())
    }

    fn remove_node(&mut self, id: &str) -> Result<()> {
        if !self.nodes.contains_key(id) {
            bail!("node '{id}' is not declared");
        }
        if self.links.keys().any(|k| k.contains(id)) {
            bail!("node '{id}' still has links");
        }
        self.stop_controller(id);
        self.bridges.remove(id);
        self.namespaces.remove(id);
        self.ports.forget(id);
        self.nodes.remove(id);
        Ok(())
    }

    fn add_link(&mut self, link: &Link) -> Result<()> {
        if self.links.contains_key(&link.key) {
            bail!("link {} is already declared", link.key);
        }
        let (a, b) = link.key.endpoints();
        for id in [a, b] {
            if !self.nodes.contains_key(id) {
                bail!("link endpoint '{id}' is not declared");
            }
        }
        if self.built {
            self.realize_link(&link.key, &link.options)
                .with_context(|| format!("add link {}", link.key))?;
        }
        self.links.insert(link.key.clone(), link.options.clone());
        Ok(())
    }

    fn remove_link(&mut self, key: &LinkKey) -> Result<()> {
        if !self.links.contains_key(key) {
            bail!("link {key} is not declared");
        }
        // detach from bridges before forgetting the link, so a failure
        // leaves it declared and realized
        if let Some(realized) = self.realized_links.get(key) {
            let attached: Vec<(&OvsBridge, &str)> = realized
                .ends
                .iter()
                .filter_map(|end| self.bridges.get(&end.node).map(|b| (b, end.iface.as_str())))
                .collect();
            for (i, (bridge, iface)) in attached.iter().enumerate() {
                if let Err(err) = bridge.del_port(iface) {
                    for (bridge, iface) in &attached[..i] {
                        let _ = bridge.add_port(iface);
                    }
                    return Err(err.context(format!("remove link {key}")));
                }
            }
        }

        self.links.remove(key);
        if let Some(realized) = self.realized_links.remove(key) {
            for end in &realized.ends {
                self.ports.release(&end.node, end.port);
            }
            debug!(link = %key, a = realized.veth.a, "removing link");
        }
        Ok(())
    }

    fn configure_link(&mut self, link: &Link) -> Result<()> {
        let Some(options) = self.links.get_mut(&link.key) else {
            bail!("link {} is not declared", link.key);
        };
        *options = link.options.clone();
        if let Some(realized) = self.realized_links.get(&link.key) {
            let config = impairment_for(&link.options);
            for end in &realized.ends {
                apply_impairment(self.exec_target(&end.node), &end.iface, &config)
                    .with_context(|| format!("reshape link {}", link.key))?;
            }
        }
        Ok(())
    }

    fn configure_host(&mut self, node: &Node) -> Result<()> {
        let id = node.id();
        if !self.nodes.contains_key(id) {
            bail!("node '{id}' is not declared");
        }
        if let (Some(ns), Some(iface)) = (self.namespaces.get(id), self.interface_of(id)) {
            let (ip, mac) = node.addressing().unwrap_or((None, None));
            if let Some(mac) = mac {
                ns.set_mac(iface, mac)?;
            }
            let addr = ip.map(|ip| ip.to_string());
            ns.replace_address(iface, addr.as_deref())?;
        }
        self.nodes.insert(id.to_string(), node.clone());
        Ok(())
    }

    fn start_controller(&mut self, id: &str) -> Result<()> {
        self.require_built()?;
        let controller = match self.nodes.get(id) {
            Some(Node::Controller(c)) => c.clone(),
            _ => bail!("controller '{id}' is not declared"),
        };
        self.stop_controller(id);

        let Some((binary, args)) = controller_command(&controller) else {
            info!(controller = id, target = controller.target(), "using remote controller");
            return Ok(());
        };
        let log_path = self.log_dir.join(format!("{id}.log"));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let mut proc = ManagedProcess::spawn(id, binary, &args, &log_path)?;

        thread::sleep(CONTROLLER_SETTLE);
        if let Some((code, tail)) = proc.check_exit() {
            bail!("controller '{id}' exited early (code {code:?}):\n{tail}");
        }
        info!(controller = id, pid = proc.pid(), kind = %controller.kind, "controller running");
        self.controllers.insert(id.to_string(), proc);
        Ok(())
    }

    fn start_switch(&mut self, id: &str, controller: Option<&str>) -> Result<()> {
        self.require_built()?;
        let bridge = self
            .bridges
            .get(id)
            .with_context(|| format!("switch '{id}' is not declared"))?;
        let target = match controller {
            Some(ctl) => match self.nodes.get(ctl) {
                Some(Node::Controller(c)) => Some(c.target()),
                _ => bail!("controller '{ctl}' is not declared"),
            },
            None => None,
        };
        if bridge.is_standalone() && target.is_some() {
            bail!("switch '{id}' is standalone");
        }
        bridge.set_controller(target.as_deref())?;
        debug!(switch = id, controller = ?controller, "switch started");
        Ok(())
    }

    fn stop_all(&mut self) -> Result<()> {
        let ids: Vec<String> = self.controllers.keys().cloned().collect();
        for id in &ids {
            self.stop_controller(id);
        }
        // veths first, then bridges and namespaces
        self.realized_links.clear();
        self.bridges.clear();
        self.namespaces.clear();
        self.ports = PortAllocator::default();
        self.built = false;
        info!("network torn down");
        Ok(())
    }

    fn interfaces_of(&self, id: &str) -> Vec<String> {
        let mut ends: Vec<&LinkEnd> = self
            .realized_links
            .values()
            .flat_map(|l| l.ends.iter())
            .filter(|end| end.node == id)
            .collect();
        ends.sort_by_key(|end| end.port);
        ends.into_iter().map(|end| end.iface.clone()).collect()
    }

    fn process_of(&self, id: &str) -> Option<u32> {
        self.controllers.get(id).map(ManagedProcess::pid)
    }
}

impl Drop for NetnsNetwork {
    fn drop(&mut self) {
        if self.built {
            warn!("netns network dropped while built, tearing down");
            let _ = self.stop_all();
        }
    }
}
