use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use super::{Position, validate_mac};
use crate::error::{Result, TopologyError};

pub const DEFAULT_CONTROLLER_PORT: u16 = 6653;
pub const DEFAULT_SWITCH_PORTS: u16 = 4;
const DEFAULT_RYU_APP: &str = "simple_switch_13";
const DEFAULT_NOX_APP: &str = "pyswitch";

/// OpenFlow versions a switch may be pinned to.
pub const OPENFLOW_PROTOCOLS: &[&str] = &[
    "OpenFlow10",
    "OpenFlow11",
    "OpenFlow12",
    "OpenFlow13",
    "OpenFlow14",
    "OpenFlow15",
];

fn default_controller_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_controller_port() -> u16 {
    DEFAULT_CONTROLLER_PORT
}

fn default_switch_ports() -> u16 {
    DEFAULT_SWITCH_PORTS
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    /// Reference OpenFlow controller shipped with Open vSwitch tooling.
    #[default]
    Default,
    /// Already running somewhere; nothing is launched.
    Remote,
    Ryu,
    Nox,
}

impl ControllerKind {
    /// Kinds that run an application and accept an `app` name.
    pub const fn takes_app(self) -> bool {
        matches!(self, ControllerKind::Ryu | ControllerKind::Nox)
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControllerKind::Default => "default",
            ControllerKind::Remote => "remote",
            ControllerKind::Ryu => "ryu",
            ControllerKind::Nox => "nox",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ControllerKind {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(ControllerKind::Default),
            "remote" => Ok(ControllerKind::Remote),
            "ryu" => Ok(ControllerKind::Ryu),
            "nox" => Ok(ControllerKind::Nox),
            other => Err(TopologyError::Validation(format!(
                "unknown controller kind '{other}': use default, remote, ryu or nox"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Controller {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub kind: ControllerKind,
    #[serde(default)]
    pub remote: bool,
    #[serde(default = "default_controller_ip")]
    pub ip: IpAddr,
    #[serde(default = "default_controller_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Controller {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            label: String::new(),
            position: Position::default(),
            kind: ControllerKind::Default,
            remote: false,
            ip: default_controller_ip(),
            port: DEFAULT_CONTROLLER_PORT,
            app: None,
            color: None,
        }
    }

    /// `tcp:<ip>:<port>` target a switch connects to.
    pub fn target(&self) -> String {
        match self.ip {
            IpAddr::V4(ip) => format!("tcp:{ip}:{}", self.port),
            IpAddr::V6(ip) => format!("tcp:[{ip}]:{}", self.port),
        }
    }

    /// True when the control plane launches this controller itself.
    pub fn is_local(&self) -> bool {
        !self.remote
    }

    /// Application the controller runs, falling back to the kind's default.
    pub fn effective_app(&self) -> Option<&str> {
        match (self.kind, self.app.as_deref()) {
            (_, Some(app)) => Some(app),
            (ControllerKind::Ryu, None) => Some(DEFAULT_RYU_APP),
            (ControllerKind::Nox, None) => Some(DEFAULT_NOX_APP),
            _ => None,
        }
    }

    pub(crate) fn validate(&mut self) -> Result<()> {
        if self.kind == ControllerKind::Remote {
            self.remote = true;
        }
        if self.port == 0 {
            return Err(TopologyError::Validation(format!(
                "controller '{}': port must be non-zero",
                self.id
            )));
        }
        if self.app.as_deref().is_some_and(|app| app.trim().is_empty()) {
            self.app = None;
        }
        if self.app.is_some() && !self.kind.takes_app() {
            return Err(TopologyError::Validation(format!(
                "controller '{}': kind {} does not take an app",
                self.id, self.kind
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Switch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchType {
    #[default]
    Default,
    /// Userspace datapath.
    User,
    Ovs,
    OvsKernel,
    /// Standalone learning bridge; never has a controller.
    OvsBridge,
}

impl SwitchType {
    pub const fn standalone(self) -> bool {
        matches!(self, SwitchType::OvsBridge)
    }
}

impl fmt::Display for SwitchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwitchType::Default => "default",
            SwitchType::User => "user",
            SwitchType::Ovs => "ovs",
            SwitchType::OvsKernel => "ovskernel",
            SwitchType::OvsBridge => "ovsbridge",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SwitchType {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(SwitchType::Default),
            "user" => Ok(SwitchType::User),
            "ovs" => Ok(SwitchType::Ovs),
            "ovskernel" => Ok(SwitchType::OvsKernel),
            "ovsbridge" => Ok(SwitchType::OvsBridge),
            other => Err(TopologyError::Validation(format!(
                "unknown switch type '{other}': use default, user, ovs, ovskernel or ovsbridge"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Switch {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default = "default_switch_ports")]
    pub ports: u16,
    #[serde(default)]
    pub switch_type: SwitchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl Switch {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            label: String::new(),
            position: Position::default(),
            ports: DEFAULT_SWITCH_PORTS,
            switch_type: SwitchType::Default,
            controller_id: None,
            protocol: None,
        }
    }

    pub(crate) fn validate(&mut self) -> Result<()> {
        if self.ports == 0 {
            return Err(TopologyError::Validation(format!(
                "switch '{}': port count must be at least 1",
                self.id
            )));
        }
        if let Some(proto) = &self.protocol
            && !OPENFLOW_PROTOCOLS.contains(&proto.as_str())
        {
            return Err(TopologyError::Validation(format!(
                "switch '{}': unsupported protocol '{proto}'",
                self.id
            )));
        }
        if self.switch_type.standalone() && self.controller_id.is_some() {
            return Err(TopologyError::Validation(format!(
                "switch '{}': an ovsbridge cannot have a controller",
                self.id
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Host-like nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpNet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

impl Host {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            label: String::new(),
            position: Position::default(),
            ip: None,
            mac: None,
        }
    }

    pub(crate) fn validate(&mut self) -> Result<()> {
        validate_addressing(&self.id, &mut self.mac)
    }
}

/// Partial update for a host-like node. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostPatch {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub ip: Option<IpNet>,
    #[serde(default)]
    pub mac: Option<String>,
}

impl HostPatch {
    /// True if the patch changes engine-visible addressing.
    pub fn touches_addressing(&self) -> bool {
        self.ip.is_some() || self.mac.is_some()
    }
}

/// A host that forwards IP between its interfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpNet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

impl Router {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            label: String::new(),
            position: Position::default(),
            ip: None,
            mac: None,
        }
    }

    pub(crate) fn validate(&mut self) -> Result<()> {
        validate_addressing(&self.id, &mut self.mac)
    }
}

/// A gateway that masquerades traffic leaving the emulated network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nat {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpNet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

impl Nat {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            label: String::new(),
            position: Position::default(),
            ip: None,
            mac: None,
        }
    }

    pub(crate) fn validate(&mut self) -> Result<()> {
        validate_addressing(&self.id, &mut self.mac)
    }
}

fn validate_addressing(id: &str, mac: &mut Option<String>) -> Result<()> {
    if let Some(m) = mac.as_deref() {
        validate_mac(m).map_err(|e| TopologyError::Validation(format!("node '{id}': {e}")))?;
        *mac = Some(m.to_ascii_lowercase());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_defaults() {
        let c: Controller = serde_json::from_str(r#"{"id":"c0"}"#).unwrap();
        assert_eq!(c.port, DEFAULT_CONTROLLER_PORT);
        assert_eq!(c.kind, ControllerKind::Default);
        assert_eq!(c.target(), "tcp:127.0.0.1:6653");
        assert!(c.is_local());
    }

    #[test]
    fn test_remote_kind_sets_flag() {
        let mut c = Controller {
            kind: ControllerKind::Remote,
            ..Controller::new("c0")
        };
        c.validate().unwrap();
        assert!(c.remote);
        assert!(!c.is_local());
    }

    #[test]
    fn test_controller_app_rules() {
        let mut c = Controller {
            app: Some("simple_switch".into()),
            ..Controller::new("c0")
        };
        assert!(matches!(c.validate(), Err(TopologyError::Validation(_))));

        let ryu = Controller {
            kind: ControllerKind::Ryu,
            ..Controller::new("c1")
        };
        assert_eq!(ryu.effective_app(), Some("simple_switch_13"));
    }

    #[test]
    fn test_switch_validation() {
        let mut sw = Switch {
            protocol: Some("OpenFlow13".into()),
            ..Switch::new("s1")
        };
        assert!(sw.validate().is_ok());

        sw.protocol = Some("OpenFlow99".into());
        assert!(sw.validate().is_err());

        let mut bridge = Switch {
            switch_type: SwitchType::OvsBridge,
            controller_id: Some("c0".into()),
            ..Switch::new("s2")
        };
        assert!(matches!(bridge.validate(), Err(TopologyError::Validation(_))));
    }

    #[test]
    fn test_switch_json_field_names() {
        let sw: Switch =
            serde_json::from_str(r#"{"id":"s1","switchType":"ovskernel","controllerId":"c0"}"#)
                .unwrap();
        assert_eq!(sw.switch_type, SwitchType::OvsKernel);
        assert_eq!(sw.controller_id.as_deref(), Some("c0"));
        assert_eq!(sw.ports, DEFAULT_SWITCH_PORTS);
    }

    #[test]
    fn test_host_mac_normalized() {
        let mut h = Host {
            mac: Some("AA:BB:CC:00:00:01".into()),
            ..Host::new("h1")
        };
        h.validate().unwrap();
        assert_eq!(h.mac.as_deref(), Some("aa:bb:cc:00:00:01"));
    }

    #[test]
    fn test_host_ip_parses_cidr() {
        let h: Host = serde_json::from_str(r#"{"id":"h1","ip":"10.0.0.1/8"}"#).unwrap();
        assert_eq!(h.ip.unwrap().to_string(), "10.0.0.1/8");
    }
}
