//! The declarative topology: every entity the client asked for, independent
//! of whether the emulated network is running.
//!
//! All mutations validate first and only then touch the maps, so a rejected
//! call never leaves a partial change behind.

mod association;
mod cascade;

use std::collections::BTreeMap;

pub use cascade::Removal;

use network_sim::interface_name;

use crate::engine::PortAllocator;
use crate::error::{Result, TopologyError};
use crate::model::{
    Controller, Host, HostPatch, Link, LinkKey, LinkOptions, Nat, Node, NodeKind, Position,
    Router, Switch,
};

/// Outcome of an upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    Inserted(Node),
    /// Carries the previous record alongside the stored one.
    Replaced { previous: Node, current: Node },
}

impl Upsert {
    pub fn current(&self) -> &Node {
        match self {
            Upsert::Inserted(node) => node,
            Upsert::Replaced { current, .. } => current,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologyStore {
    controllers: BTreeMap<String, Controller>,
    switches: BTreeMap<String, Switch>,
    hosts: BTreeMap<String, Host>,
    routers: BTreeMap<String, Router>,
    nats: BTreeMap<String, Nat>,
    links: BTreeMap<LinkKey, LinkOptions>,
}

impl TopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- queries --

    pub fn kind_of(&self, id: &str) -> Option<NodeKind> {
        if self.controllers.contains_key(id) {
            Some(NodeKind::Controller)
        } else if self.switches.contains_key(id) {
            Some(NodeKind::Switch)
        } else if self.hosts.contains_key(id) {
            Some(NodeKind::Host)
        } else if self.routers.contains_key(id) {
            Some(NodeKind::Router)
        } else if self.nats.contains_key(id) {
            Some(NodeKind::Nat)
        } else {
            None
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.kind_of(id).is_some()
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        match self.kind_of(id)? {
            NodeKind::Controller => self.controllers.get(id).cloned().map(Node::Controller),
            NodeKind::Switch => self.switches.get(id).cloned().map(Node::Switch),
            NodeKind::Host => self.hosts.get(id).cloned().map(Node::Host),
            NodeKind::Router => self.routers.get(id).cloned().map(Node::Router),
            NodeKind::Nat => self.nats.get(id).cloned().map(Node::Nat),
        }
    }

    pub fn controller(&self, id: &str) -> Option<&Controller> {
        self.controllers.get(id)
    }

    pub fn switch(&self, id: &str) -> Option<&Switch> {
        self.switches.get(id)
    }

    pub fn controllers(&self) -> impl Iterator<Item = &Controller> {
        self.controllers.values()
    }

    pub fn switches(&self) -> impl Iterator<Item = &Switch> {
        self.switches.values()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    pub fn routers(&self) -> impl Iterator<Item = &Router> {
        self.routers.values()
    }

    pub fn nats(&self) -> impl Iterator<Item = &Nat> {
        self.nats.values()
    }

    /// Every node in dependency order: controllers, switches, then
    /// hosts, routers and NATs.
    pub fn nodes(&self) -> Vec<Node> {
        let mut nodes = Vec::with_capacity(self.node_count());
        nodes.extend(self.controllers.values().cloned().map(Node::Controller));
        nodes.extend(self.switches.values().cloned().map(Node::Switch));
        nodes.extend(self.hosts.values().cloned().map(Node::Host));
        nodes.extend(self.routers.values().cloned().map(Node::Router));
        nodes.extend(self.nats.values().cloned().map(Node::Nat));
        nodes
    }

    pub fn node_count(&self) -> usize {
        self.controllers.len()
            + self.switches.len()
            + self.hosts.len()
            + self.routers.len()
            + self.nats.len()
    }

    pub fn links(&self) -> Vec<Link> {
        self.links
            .iter()
            .map(|(key, options)| Link {
                key: key.clone(),
                options: options.clone(),
            })
            .collect()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn link(&self, a: &str, b: &str) -> Option<&LinkOptions> {
        self.links.get(&LinkKey::new(a, b))
    }

    pub fn links_of(&self, id: &str) -> Vec<Link> {
        self.links
            .iter()
            .filter(|(key, _)| key.contains(id))
            .map(|(key, options)| Link {
                key: key.clone(),
                options: options.clone(),
            })
            .collect()
    }

    /// Switches currently associated with `controller_id`.
    pub fn switches_of(&self, controller_id: &str) -> Vec<String> {
        self.switches
            .values()
            .filter(|s| s.controller_id.as_deref() == Some(controller_id))
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.node_count() == 0 && self.links.is_empty()
    }

    // -- node mutations --

    /// Insert `node`, or replace the record with the same id and kind.
    pub fn upsert(&mut self, mut node: Node) -> Result<Upsert> {
        node.validate()?;
        let id = node.id().to_string();

        if let Some(existing) = self.kind_of(&id)
            && existing != node.kind()
        {
            return Err(TopologyError::Conflict(format!(
                "id '{id}' is already used by a {existing}"
            )));
        }

        match &node {
            Node::Switch(sw) => {
                if let Some(ctl) = &sw.controller_id
                    && !self.controllers.contains_key(ctl)
                {
                    return Err(TopologyError::not_found("controller", ctl));
                }
            }
            Node::Controller(c) => self.check_controller_endpoint(c)?,
            _ => {}
        }

        let previous = self.node(&id);
        self.put(node.clone());

        Ok(match previous {
            Some(previous) => Upsert::Replaced {
                previous,
                current: node,
            },
            None => Upsert::Inserted(node),
        })
    }

    /// Two locally launched controllers cannot listen on the same socket.
    fn check_controller_endpoint(&self, c: &Controller) -> Result<()> {
        if !c.is_local() {
            return Ok(());
        }
        let clash = self
            .controllers
            .values()
            .find(|o| o.id != c.id && o.is_local() && o.ip == c.ip && o.port == c.port);
        match clash {
            Some(other) => Err(TopologyError::Conflict(format!(
                "controller '{}' already listens on {}:{}",
                other.id, c.ip, c.port
            ))),
            None => Ok(()),
        }
    }

    /// Store `node` without validation. Callers validated it already, or are
    /// restoring a record that was valid before.
    pub(crate) fn put(&mut self, node: Node) {
        match node {
            Node::Controller(c) => {
                self.controllers.insert(c.id.clone(), c);
            }
            Node::Switch(s) => {
                self.switches.insert(s.id.clone(), s);
            }
            Node::Host(h) => {
                self.hosts.insert(h.id.clone(), h);
            }
            Node::Router(r) => {
                self.routers.insert(r.id.clone(), r);
            }
            Node::Nat(n) => {
                self.nats.insert(n.id.clone(), n);
            }
        }
    }

    /// Apply `patch` to a host, router or NAT. Returns the updated record.
    pub fn update_host(&mut self, id: &str, patch: &HostPatch) -> Result<Node> {
        let mut node = self
            .node(id)
            .ok_or_else(|| TopologyError::not_found("node", id))?;
        let kind = node.kind();

        match &mut node {
            Node::Host(Host {
                label, ip, mac, ..
            })
            | Node::Router(Router {
                label, ip, mac, ..
            })
            | Node::Nat(Nat {
                label, ip, mac, ..
            }) => {
                if let Some(new_label) = &patch.label {
                    *label = new_label.clone();
                }
                if let Some(new_ip) = patch.ip {
                    *ip = Some(new_ip);
                }
                if let Some(new_mac) = &patch.mac {
                    *mac = Some(new_mac.clone());
                }
            }
            Node::Controller(_) | Node::Switch(_) => {
                return Err(TopologyError::Validation(format!(
                    "'{id}' is a {kind}, not a host, router or nat"
                )));
            }
        }
        if let Some(position) = patch.position {
            node.set_position(position);
        }

        node.validate()?;
        self.put(node.clone());
        Ok(node)
    }

    pub fn move_node(&mut self, id: &str, position: Position) -> Result<Node> {
        let mut node = self
            .node(id)
            .ok_or_else(|| TopologyError::not_found("node", id))?;
        node.set_position(position);
        self.put(node.clone());
        Ok(node)
    }

    // -- link mutations --

    pub fn add_link(&mut self, a: &str, b: &str, options: LinkOptions) -> Result<Link> {
        options.validate()?;
        let key = LinkKey::new(a, b);
        if key.is_loop() {
            return Err(TopologyError::Validation(format!(
                "cannot link '{a}' to itself"
            )));
        }

        for id in [a, b] {
            let kind = self
                .kind_of(id)
                .ok_or_else(|| TopologyError::not_found("node", id))?;
            if !kind.linkable() {
                return Err(TopologyError::Validation(format!(
                    "'{id}' is a controller and cannot be linked"
                )));
            }
        }

        if self.links.contains_key(&key) {
            return Err(TopologyError::Conflict(format!("link {key} already exists")));
        }

        for id in [a, b] {
            if let Some(kind) = self.kind_of(id)
                && kind.single_interface()
                && self.links.keys().any(|k| k.contains(id))
            {
                return Err(TopologyError::Conflict(format!(
                    "{kind} '{id}' already has a link"
                )));
            }
        }

        // the engines hand out the lowest free port, so the new link lands
        // on port `first + links`
        for id in [a, b] {
            if let Some(kind) = self.kind_of(id) {
                let port = PortAllocator::first_port(kind) + self.links_of(id).len();
                if let Err(err) = interface_name(id, port) {
                    return Err(TopologyError::Validation(format!(
                        "{kind} '{id}' has no port left: {err}"
                    )));
                }
            }
        }

        self.links.insert(key.clone(), options.clone());
        Ok(Link { key, options })
    }

    /// Replace the options of an existing link, returning the old ones.
    pub fn update_link(&mut self, a: &str, b: &str, options: LinkOptions) -> Result<LinkOptions> {
        options.validate()?;
        let key = LinkKey::new(a, b);
        let slot = self
            .links
            .get_mut(&key)
            .ok_or_else(|| TopologyError::NotFound(format!("link {key}")))?;
        Ok(std::mem::replace(slot, options))
    }

    pub fn remove_link(&mut self, a: &str, b: &str) -> Result<Link> {
        let key = LinkKey::new(a, b);
        let options = self
            .links
            .remove(&key)
            .ok_or_else(|| TopologyError::NotFound(format!("link {key}")))?;
        Ok(Link { key, options })
    }

    pub(crate) fn put_link(&mut self, link: Link) {
        self.links.insert(link.key, link.options);
    }

    /// Drop every entity.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
