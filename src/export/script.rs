//! Renders a POSIX shell script that recreates a topology with `ip`,
//! `ovs-vsctl` and `tc`, mirroring what the netns engine does.

use std::borrow::Cow;
use std::fmt::Write as _;

use anyhow::Result;
use chrono::Utc;
use network_sim::interface_name;

use crate::engine::{PortAllocator, controller_command, datapath_for, impairment_for};
use crate::model::{Node, NodeKind};
use crate::topology::TopologyStore;

fn quote(arg: &str) -> Cow<'_, str> {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,[]".contains(c));
    if plain {
        Cow::Borrowed(arg)
    } else {
        Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
    }
}

fn line(out: &mut String, words: &[&str]) {
    let quoted: Vec<Cow<'_, str>> = words.iter().map(|w| quote(w)).collect();
    let _ = writeln!(out, "{}", quoted.join(" "));
}

/// Prefix that runs a command inside the node's namespace, if it has one.
fn in_node<'a>(store: &TopologyStore, id: &'a str) -> Vec<&'a str> {
    match store.kind_of(id) {
        Some(kind) if kind.single_interface() => vec!["ip", "netns", "exec", id],
        _ => Vec::new(),
    }
}

pub fn render_script(store: &TopologyStore) -> Result<String> {
    let mut out = String::new();
    let _ = writeln!(out, "#!/bin/sh");
    let _ = writeln!(
        out,
        "# topology generated by topoctl {} at {}",
        env!("CARGO_PKG_VERSION"),
        Utc::now().to_rfc3339()
    );
    let _ = writeln!(out, "set -e");

    if store.switches().next().is_some() {
        let _ = writeln!(out, "\n# switches");
    }
    for sw in store.switches() {
        let mut add = vec!["ovs-vsctl", "--may-exist", "add-br", sw.id.as_str()];
        if datapath_for(sw.switch_type) == network_sim::Datapath::Userspace {
            add.extend(["--", "set", "bridge", sw.id.as_str(), "datapath_type=netdev"]);
        }
        line(&mut out, &add);
        let fail_mode = if sw.switch_type.standalone() {
            "standalone"
        } else {
            "secure"
        };
        line(&mut out, &["ovs-vsctl", "set-fail-mode", sw.id.as_str(), fail_mode]);
        if let Some(proto) = &sw.protocol {
            let arg = format!("protocols={proto}");
            line(&mut out, &["ovs-vsctl", "set", "bridge", sw.id.as_str(), arg.as_str()]);
        }
    }

    let host_like: Vec<Node> = store
        .nodes()
        .into_iter()
        .filter(|n| n.kind().single_interface())
        .collect();
    if !host_like.is_empty() {
        let _ = writeln!(out, "\n# hosts, routers and nats");
    }
    for node in &host_like {
        let id = node.id();
        line(&mut out, &["ip", "netns", "add", id]);
        line(&mut out, &["ip", "netns", "exec", id, "ip", "link", "set", "lo", "up"]);
        if matches!(node.kind(), NodeKind::Router | NodeKind::Nat) {
            line(
                &mut out,
                &["ip", "netns", "exec", id, "sysctl", "-q", "-w", "net.ipv4.ip_forward=1"],
            );
        }
    }

    let links = store.links();
    if !links.is_empty() {
        let _ = writeln!(out, "\n# links");
    }
    let mut ports = PortAllocator::default();
    for link in &links {
        let (a, b) = link.key.endpoints();
        let mut ends = Vec::with_capacity(2);
        for id in [a, b] {
            let kind = store.kind_of(id).unwrap_or(NodeKind::Host);
            ends.push((id, interface_name(id, ports.allocate(id, kind))?));
        }
        line(
            &mut out,
            &[
                "ip",
                "link",
                "add",
                ends[0].1.as_str(),
                "type",
                "veth",
                "peer",
                "name",
                ends[1].1.as_str(),
            ],
        );

        for (id, iface) in &ends {
            let (id, iface) = (*id, iface.as_str());
            let node = store.node(id);
            match node.as_ref().map(Node::kind) {
                Some(NodeKind::Switch) => {
                    line(&mut out, &["ovs-vsctl", "--may-exist", "add-port", id, iface]);
                    line(&mut out, &["ip", "link", "set", iface, "up"]);
                }
                _ => {
                    line(&mut out, &["ip", "link", "set", iface, "netns", id]);
                    let ns = ["ip", "netns", "exec", id];
                    let (ip, mac) = node
                        .as_ref()
                        .and_then(Node::addressing)
                        .unwrap_or((None, None));
                    if let Some(mac) = mac {
                        line(
                            &mut out,
                            &[&ns[..], &["ip", "link", "set", "dev", iface, "address", mac]].concat(),
                        );
                    }
                    if let Some(ip) = ip {
                        let addr = ip.to_string();
                        line(
                            &mut out,
                            &[&ns[..], &["ip", "addr", "add", addr.as_str(), "dev", iface]].concat(),
                        );
                    }
                    line(&mut out, &[&ns[..], &["ip", "link", "set", iface, "up"]].concat());
                    if node.as_ref().map(Node::kind) == Some(NodeKind::Nat) {
                        line(
                            &mut out,
                            &[
                                &ns[..],
                                &[
                                    "iptables",
                                    "-t",
                                    "nat",
                                    "-A",
                                    "POSTROUTING",
                                    "-o",
                                    iface,
                                    "-j",
                                    "MASQUERADE",
                                ],
                            ]
                            .concat(),
                        );
                    }
                }
            }
        }

        let config = impairment_for(&link.options);
        for (id, iface) in &ends {
            for args in config.tc_commands(iface)? {
                let mut words = in_node(store, id);
                words.push("tc");
                words.extend(args.iter().map(String::as_str));
                line(&mut out, &words);
            }
        }
    }

    if store.controllers().next().is_some() {
        let _ = writeln!(out, "\n# controllers");
    }
    for c in store.controllers() {
        match controller_command(c) {
            Some((binary, args)) => {
                let mut words = vec![binary];
                words.extend(args.iter().map(String::as_str));
                let quoted: Vec<Cow<'_, str>> = words.iter().map(|w| quote(w)).collect();
                let _ = writeln!(out, "{} > {}.log 2>&1 &", quoted.join(" "), c.id);
            }
            None => {
                let _ = writeln!(out, "# {} is remote at {}", c.id, c.target());
            }
        }
    }
    for sw in store.switches() {
        if let Some(c) = sw.controller_id.as_deref().and_then(|id| store.controller(id)) {
            let target = c.target();
            line(&mut out, &["ovs-vsctl", "set-controller", sw.id.as_str(), target.as_str()]);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Controller, Host, LinkOptions, Nat, Switch, SwitchType};

    fn store() -> TopologyStore {
        let mut store = TopologyStore::new();
        store.upsert(Controller::new("c0").into()).unwrap();
        store
            .upsert(
                Switch {
                    controller_id: Some("c0".into()),
                    switch_type: SwitchType::User,
                    ..Switch::new("s1")
                }
                .into(),
            )
            .unwrap();
        store
            .upsert(
                Host {
                    ip: Some("10.0.0.1/8".parse().unwrap()),
                    mac: Some("00:00:00:00:00:01".into()),
                    ..Host::new("h1")
                }
                .into(),
            )
            .unwrap();
        store.upsert(Nat::new("nat0").into()).unwrap();
        store
            .add_link(
                "h1",
                "s1",
                LinkOptions {
                    bandwidth: Some(10.0),
                    delay: Some(5),
                    enabled: true,
                    ..Default::default()
                },
            )
            .unwrap();
        store.add_link("nat0", "s1", LinkOptions::default()).unwrap();
        store
    }

    #[test]
    fn test_script_recreates_topology() {
        let script = render_script(&store()).unwrap();
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("ovs-vsctl --may-exist add-br s1 -- set bridge s1 datapath_type=netdev"));
        assert!(script.contains("ip netns add h1"));
        assert!(script.contains("ip link add h1-eth0 type veth peer name s1-eth1"));
        assert!(script.contains("ip netns exec h1 ip addr add 10.0.0.1/8 dev h1-eth0"));
        assert!(script.contains("ip netns exec h1 ip link set dev h1-eth0 address 00:00:00:00:00:01"));
        assert!(script.contains("ip link add nat0-eth0 type veth peer name s1-eth2"));
        assert!(script.contains("MASQUERADE"));
        assert!(script.contains("ovs-testcontroller ptcp:6653:127.0.0.1 > c0.log 2>&1 &"));
        assert!(script.contains("ovs-vsctl set-controller s1 tcp:127.0.0.1:6653"));
    }

    #[test]
    fn test_script_shapes_both_ends() {
        let script = render_script(&store()).unwrap();
        assert!(script.contains("ip netns exec h1 tc qdisc add dev h1-eth0 root handle 1: tbf rate 10000kbit"));
        assert!(script.contains("\ntc qdisc add dev s1-eth1 root handle 1: tbf rate 10000kbit"));
        // unshaped link gets no qdisc
        assert!(!script.contains("dev nat0-eth0 root"));
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("h1-eth0"), "h1-eth0");
        assert_eq!(quote("two words"), "'two words'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }
}
