use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::command::{privileged, privileged_checked};
use crate::namespace::Namespace;

/// Linux netdev name limit (IFNAMSIZ - 1).
pub const MAX_IFNAME_LEN: usize = 15;

/// A veth pair created in the root namespace.
///
/// Either end can then be moved into a [`Namespace`] or enslaved to a
/// bridge. The pair is deleted on drop; deleting one end removes both, and
/// an end that already vanished with its namespace is ignored.
#[derive(Debug)]
pub struct VethPair {
    pub a: String,
    pub b: String,
}

impl VethPair {
    pub fn create(a: &str, b: &str) -> Result<Self> {
        for name in [a, b] {
            if name.is_empty() || name.len() > MAX_IFNAME_LEN {
                bail!("interface name '{name}' must be 1..={MAX_IFNAME_LEN} chars");
            }
        }

        // Stale pair from a previous run
        let _ = privileged(&["ip", "link", "del", a]);

        privileged_checked(&["ip", "link", "add", a, "type", "veth", "peer", "name", b])
            .with_context(|| format!("create veth pair {a} <-> {b}"))?;

        debug!(a, b, "created veth pair");

        Ok(Self {
            a: a.to_string(),
            b: b.to_string(),
        })
    }

    /// Move interface `iface` (one of the two ends) into `ns`.
    pub fn move_into(&self, iface: &str, ns: &Namespace) -> Result<()> {
        privileged_checked(&["ip", "link", "set", iface, "netns", &ns.name])
            .with_context(|| format!("move {iface} into ns '{}'", ns.name))?;
        Ok(())
    }

    /// Bring an end that stays in the root namespace up.
    pub fn set_up(&self, iface: &str) -> Result<()> {
        privileged_checked(&["ip", "link", "set", iface, "up"])
            .with_context(|| format!("bring {iface} up"))?;
        Ok(())
    }
}

impl Drop for VethPair {
    fn drop(&mut self) {
        let _ = privileged(&["ip", "link", "del", &self.a]);
    }
}

/// Build the `<node>-eth<port>` interface name. Fails when it does not fit
/// the netdev limit; names are never truncated.
pub fn interface_name(node: &str, port: usize) -> Result<String> {
    let name = format!("{node}-eth{port}");
    if name.len() > MAX_IFNAME_LEN {
        bail!("interface name '{name}' exceeds {MAX_IFNAME_LEN} chars");
    }
    Ok(name)
}
