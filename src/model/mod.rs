//! Entity records for the declared topology.
//!
//! Every node is identified by a string id that is also its engine handle.
//! [`Node`] is the tagged union over the five node kinds; links are keyed by
//! the unordered endpoint pair [`LinkKey`].

mod link;
mod nodes;

use std::fmt;

pub use link::{Link, LinkKey, LinkOptions, MAX_BANDWIDTH_MBIT};
pub use nodes::{
    Controller, ControllerKind, DEFAULT_CONTROLLER_PORT, DEFAULT_SWITCH_PORTS, Host, HostPatch,
    Nat, OPENFLOW_PROTOCOLS, Router, Switch, SwitchType,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TopologyError};

/// Longest id accepted, so that `<id>-eth<N>` fits the 15-char netdev limit.
pub const MAX_ID_LEN: usize = 10;

/// Canvas position of a node (display metadata only).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Controller,
    Switch,
    Host,
    Router,
    Nat,
}

impl NodeKind {
    /// Host-like nodes have a single network interface and so at most one
    /// link.
    pub const fn single_interface(self) -> bool {
        matches!(self, NodeKind::Host | NodeKind::Router | NodeKind::Nat)
    }

    /// Controllers are reached out of band and never take part in links.
    pub const fn linkable(self) -> bool {
        !matches!(self, NodeKind::Controller)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Controller => "controller",
            NodeKind::Switch => "switch",
            NodeKind::Host => "host",
            NodeKind::Router => "router",
            NodeKind::Nat => "nat",
        };
        f.write_str(s)
    }
}

/// Any node record, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    Controller(Controller),
    Switch(Switch),
    Host(Host),
    Router(Router),
    Nat(Nat),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Controller(c) => &c.id,
            Node::Switch(s) => &s.id,
            Node::Host(h) => &h.id,
            Node::Router(r) => &r.id,
            Node::Nat(n) => &n.id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Controller(_) => NodeKind::Controller,
            Node::Switch(_) => NodeKind::Switch,
            Node::Host(_) => NodeKind::Host,
            Node::Router(_) => NodeKind::Router,
            Node::Nat(_) => NodeKind::Nat,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Node::Controller(c) => c.position,
            Node::Switch(s) => s.position,
            Node::Host(h) => h.position,
            Node::Router(r) => r.position,
            Node::Nat(n) => n.position,
        }
    }

    pub fn set_position(&mut self, position: Position) {
        match self {
            Node::Controller(c) => c.position = position,
            Node::Switch(s) => s.position = position,
            Node::Host(h) => h.position = position,
            Node::Router(r) => r.position = position,
            Node::Nat(n) => n.position = position,
        }
    }

    /// Validate and normalize the record in place.
    pub fn validate(&mut self) -> Result<()> {
        validate_id(self.id())?;
        match self {
            Node::Controller(c) => c.validate(),
            Node::Switch(s) => s.validate(),
            Node::Host(h) => h.validate(),
            Node::Router(r) => r.validate(),
            Node::Nat(n) => n.validate(),
        }
    }

    /// Address and MAC for host-like nodes.
    pub fn addressing(&self) -> Option<(Option<ipnet::IpNet>, Option<&str>)> {
        match self {
            Node::Host(h) => Some((h.ip, h.mac.as_deref())),
            Node::Router(r) => Some((r.ip, r.mac.as_deref())),
            Node::Nat(n) => Some((n.ip, n.mac.as_deref())),
            Node::Controller(_) | Node::Switch(_) => None,
        }
    }
}

impl From<Controller> for Node {
    fn from(c: Controller) -> Self {
        Node::Controller(c)
    }
}

impl From<Switch> for Node {
    fn from(s: Switch) -> Self {
        Node::Switch(s)
    }
}

impl From<Host> for Node {
    fn from(h: Host) -> Self {
        Node::Host(h)
    }
}

impl From<Router> for Node {
    fn from(r: Router) -> Self {
        Node::Router(r)
    }
}

impl From<Nat> for Node {
    fn from(n: Nat) -> Self {
        Node::Nat(n)
    }
}

pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(TopologyError::Validation(format!(
            "id '{id}' must be 1..={MAX_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(TopologyError::Validation(format!(
            "id '{id}' may only contain letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

/// Accepts `aa:bb:cc:dd:ee:ff` (hex, either case).
pub fn validate_mac(mac: &str) -> Result<()> {
    let parts: Vec<&str> = mac.split(':').collect();
    let ok = parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()));
    if ok {
        Ok(())
    } else {
        Err(TopologyError::Validation(format!("malformed mac '{mac}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("h1").is_ok());
        assert!(validate_id("core_sw-1").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("abcdefghijk").is_err());
        assert!(validate_id("h 1").is_err());
        assert!(validate_id("h/1").is_err());
    }

    #[test]
    fn test_validate_mac() {
        assert!(validate_mac("00:00:00:00:00:01").is_ok());
        assert!(validate_mac("AA:bb:CC:dd:EE:ff").is_ok());
        assert!(validate_mac("00:00:00:00:01").is_err());
        assert!(validate_mac("00:00:00:00:00:zz").is_err());
    }

    #[test]
    fn test_node_kind_link_rules() {
        assert!(NodeKind::Host.single_interface());
        assert!(NodeKind::Nat.single_interface());
        assert!(!NodeKind::Switch.single_interface());
        assert!(!NodeKind::Controller.linkable());
        assert!(NodeKind::Router.linkable());
    }

    #[test]
    fn test_node_serializes_with_type_tag() {
        let node = Node::from(Host::new("h1"));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "host");
        assert_eq!(json["id"], "h1");
    }
}
