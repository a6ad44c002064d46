use std::process::Output;

use anyhow::{Context, Result};
use tracing::debug;

use crate::command::{Exec, privileged, privileged_checked};

/// A Linux network namespace with RAII cleanup.
///
/// Creates the namespace on construction, brings up loopback, and deletes
/// it on drop. Interfaces moved into the namespace go away with it.
#[derive(Debug)]
pub struct Namespace {
    pub name: String,
}

impl Namespace {
    pub fn new(name: &str) -> Result<Self> {
        // Stale namespace from a previous run
        let _ = privileged(&["ip", "netns", "del", name]);

        privileged_checked(&["ip", "netns", "add", name])
            .with_context(|| format!("create netns '{name}'"))?;

        debug!(ns = name, "created network namespace");

        let ns = Self {
            name: name.to_string(),
        };
        // Loopback is best-effort
        let _ = ns.exec("ip", &["link", "set", "lo", "up"]);
        Ok(ns)
    }

    /// Assign `addr` (CIDR notation) to `iface` and bring it up.
    pub fn configure_interface(&self, iface: &str, addr: Option<&str>) -> Result<()> {
        if let Some(addr) = addr {
            self.exec_checked("ip", &["addr", "add", addr, "dev", iface])
                .with_context(|| format!("set {addr} on {iface}"))?;
        }
        self.exec_checked("ip", &["link", "set", iface, "up"])
            .with_context(|| format!("bring {iface} up"))?;
        Ok(())
    }

    /// Replace every address on `iface` with `addr`.
    pub fn replace_address(&self, iface: &str, addr: Option<&str>) -> Result<()> {
        self.exec_checked("ip", &["addr", "flush", "dev", iface])
            .with_context(|| format!("flush addresses on {iface}"))?;
        if let Some(addr) = addr {
            self.exec_checked("ip", &["addr", "add", addr, "dev", iface])
                .with_context(|| format!("set {addr} on {iface}"))?;
        }
        Ok(())
    }

    /// Set the hardware address of `iface`.
    pub fn set_mac(&self, iface: &str, mac: &str) -> Result<()> {
        self.exec_checked("ip", &["link", "set", "dev", iface, "address", mac])
            .with_context(|| format!("set mac {mac} on {iface}"))?;
        Ok(())
    }

    /// Turn on IPv4 forwarding inside the namespace.
    pub fn enable_forwarding(&self) -> Result<()> {
        self.exec_checked("sysctl", &["-q", "-w", "net.ipv4.ip_forward=1"])
            .context("enable ip_forward")?;
        Ok(())
    }

    /// Masquerade traffic leaving through `iface`.
    pub fn enable_masquerade(&self, iface: &str) -> Result<()> {
        self.exec_checked(
            "iptables",
            &["-t", "nat", "-A", "POSTROUTING", "-o", iface, "-j", "MASQUERADE"],
        )
        .with_context(|| format!("masquerade on {iface}"))?;
        Ok(())
    }
}

impl Exec for Namespace {
    fn exec(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let mut full_args = vec!["ip", "netns", "exec", &self.name, cmd];
        full_args.extend_from_slice(args);
        privileged(&full_args).with_context(|| format!("exec '{cmd}' in ns '{}'", self.name))
    }

    fn context_name(&self) -> &str {
        &self.name
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        debug!(ns = self.name, "deleting network namespace");
        let _ = privileged(&["ip", "netns", "del", &self.name]);
    }
}
