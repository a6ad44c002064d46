use anyhow::{Context, Result};
use tracing::debug;

use crate::command::{privileged, privileged_checked};

/// Open vSwitch datapath flavour for a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Datapath {
    /// In-kernel datapath.
    #[default]
    Kernel,
    /// Userspace (`netdev`) datapath.
    Userspace,
}

/// An Open vSwitch bridge in the root namespace, deleted on drop.
#[derive(Debug)]
pub struct OvsBridge {
    pub name: String,
    standalone: bool,
}

impl OvsBridge {
    /// Create the bridge.
    ///
    /// A `standalone` bridge forwards as a learning switch when it has no
    /// controller; otherwise the fail mode is `secure` and the bridge drops
    /// traffic until a controller installs flows.
    pub fn new(name: &str, datapath: Datapath, standalone: bool) -> Result<Self> {
        let _ = privileged(&["ovs-vsctl", "--if-exists", "del-br", name]);

        let mut args = vec!["ovs-vsctl", "add-br", name];
        if datapath == Datapath::Userspace {
            args.extend_from_slice(&["--", "set", "bridge", name, "datapath_type=netdev"]);
        }
        privileged_checked(&args).with_context(|| format!("create ovs bridge '{name}'"))?;

        let fail_mode = if standalone { "standalone" } else { "secure" };
        privileged_checked(&["ovs-vsctl", "set-fail-mode", name, fail_mode])
            .with_context(|| format!("set fail mode on '{name}'"))?;

        debug!(bridge = name, ?datapath, standalone, "created ovs bridge");

        Ok(Self {
            name: name.to_string(),
            standalone,
        })
    }

    pub fn is_standalone(&self) -> bool {
        self.standalone
    }

    /// Point the bridge at `target` (e.g. `tcp:127.0.0.1:6653`), or clear
    /// the controller when `None`.
    pub fn set_controller(&self, target: Option<&str>) -> Result<()> {
        match target {
            Some(target) => {
                privileged_checked(&["ovs-vsctl", "set-controller", &self.name, target])
                    .with_context(|| format!("set controller {target} on '{}'", self.name))?;
            }
            None => {
                privileged_checked(&["ovs-vsctl", "del-controller", &self.name])
                    .with_context(|| format!("clear controller on '{}'", self.name))?;
            }
        }
        Ok(())
    }

    /// Restrict the OpenFlow versions the bridge speaks.
    pub fn set_protocols(&self, protocols: &str) -> Result<()> {
        let arg = format!("protocols={protocols}");
        privileged_checked(&["ovs-vsctl", "set", "bridge", &self.name, &arg])
            .with_context(|| format!("set {arg} on '{}'", self.name))?;
        Ok(())
    }

    /// Attach `iface` as a bridge port and bring it up.
    pub fn add_port(&self, iface: &str) -> Result<()> {
        privileged_checked(&["ovs-vsctl", "--may-exist", "add-port", &self.name, iface])
            .with_context(|| format!("add port {iface} to '{}'", self.name))?;
        privileged_checked(&["ip", "link", "set", iface, "up"])
            .with_context(|| format!("bring {iface} up"))?;
        Ok(())
    }

    pub fn del_port(&self, iface: &str) -> Result<()> {
        privileged_checked(&["ovs-vsctl", "--if-exists", "del-port", &self.name, iface])
            .with_context(|| format!("remove port {iface} from '{}'", self.name))?;
        Ok(())
    }
}

impl Drop for OvsBridge {
    fn drop(&mut self) {
        debug!(bridge = self.name, "deleting ovs bridge");
        let _ = privileged(&["ovs-vsctl", "--if-exists", "del-br", &self.name]);
    }
}
