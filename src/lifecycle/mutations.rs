use anyhow::Context;
use tracing::{debug, info, warn};

use super::{ControlPlane, Inner, Shared, adapter};
use crate::engine::LiveNetwork;
use crate::error::{Result, TopologyError};
use crate::export::TopologyDocument;
use crate::model::{
    Controller, Host, HostPatch, Link, LinkKey, LinkOptions, Nat, Node, NodeKind, Position,
    Router, Switch,
};
use crate::topology::{Removal, Upsert};

/// What the adapter must do to follow a replaced record.
enum Change {
    /// Display metadata only.
    None,
    /// Address or MAC of a host-like node.
    Addressing,
    /// Switch pointed at another controller, or at none.
    Controller(Option<String>),
    /// Controller endpoint or application changed; relaunch it.
    Relaunch,
}

fn classify(previous: &Node, current: &Node) -> Result<Change> {
    match (previous, current) {
        (Node::Controller(a), Node::Controller(b)) => {
            let same = a.kind == b.kind
                && a.remote == b.remote
                && a.ip == b.ip
                && a.port == b.port
                && a.app == b.app;
            Ok(if same { Change::None } else { Change::Relaunch })
        }
        (Node::Switch(a), Node::Switch(b)) => {
            if a.switch_type != b.switch_type || a.protocol != b.protocol {
                return Err(TopologyError::Conflict(format!(
                    "switch '{}': type and protocol cannot change while the network is started",
                    b.id
                )));
            }
            Ok(if a.controller_id == b.controller_id {
                Change::None
            } else {
                Change::Controller(b.controller_id.clone())
            })
        }
        _ if previous.addressing() != current.addressing() => Ok(Change::Addressing),
        _ => Ok(Change::None),
    }
}

impl ControlPlane {
    /// Insert or replace a node of any kind. Returns the stored record.
    pub async fn create_node(&self, node: Node) -> Result<Node> {
        let mut inner = self.shared.inner.lock().await;
        let res = self.shared.upsert_locked(&mut inner, node).await;
        self.shared.publish(&inner);
        res
    }

    pub async fn create_controller(&self, controller: Controller) -> Result<Node> {
        self.create_node(controller.into()).await
    }

    pub async fn create_switch(&self, switch: Switch) -> Result<Node> {
        self.create_node(switch.into()).await
    }

    pub async fn create_host(&self, host: Host) -> Result<Node> {
        self.create_node(host.into()).await
    }

    pub async fn create_router(&self, router: Router) -> Result<Node> {
        self.create_node(router.into()).await
    }

    pub async fn create_nat(&self, nat: Nat) -> Result<Node> {
        self.create_node(nat.into()).await
    }

    /// Patch a host, router or NAT.
    pub async fn update_host(&self, id: &str, patch: HostPatch) -> Result<Node> {
        let mut inner = self.shared.inner.lock().await;
        let res = update_host_locked(&mut inner, id, &patch).await;
        self.shared.publish(&inner);
        res
    }

    /// Change a node's canvas position. Never reaches the adapter.
    pub async fn move_node(&self, id: &str, position: Position) -> Result<Node> {
        let mut inner = self.shared.inner.lock().await;
        let res = inner.store.move_node(id, position);
        self.shared.publish(&inner);
        res
    }

    pub async fn associate(&self, switch_id: &str, controller_id: &str) -> Result<Switch> {
        let mut inner = self.shared.inner.lock().await;
        let res = associate_locked(&mut inner, switch_id, controller_id).await;
        self.shared.publish(&inner);
        res
    }

    /// Clear a switch's association. With `controller_id`, the switch must
    /// be associated with that controller.
    pub async fn disassociate(&self, switch_id: &str, controller_id: Option<&str>) -> Result<Switch> {
        let mut inner = self.shared.inner.lock().await;
        let res = disassociate_locked(&mut inner, switch_id, controller_id).await;
        self.shared.publish(&inner);
        res
    }

    pub async fn create_link(&self, a: &str, b: &str, options: LinkOptions) -> Result<Link> {
        let mut inner = self.shared.inner.lock().await;
        let res = create_link_locked(&mut inner, a, b, options).await;
        self.shared.publish(&inner);
        res
    }

    pub async fn update_link(&self, a: &str, b: &str, options: LinkOptions) -> Result<Link> {
        let mut inner = self.shared.inner.lock().await;
        let res = update_link_locked(&mut inner, a, b, options).await;
        self.shared.publish(&inner);
        res
    }

    pub async fn delete_link(&self, a: &str, b: &str) -> Result<Link> {
        let mut inner = self.shared.inner.lock().await;
        let res = delete_link_locked(&mut inner, a, b).await;
        self.shared.publish(&inner);
        res
    }

    /// Remove a node and everything that refers to it.
    pub async fn delete_node(&self, id: &str) -> Result<Removal> {
        let mut inner = self.shared.inner.lock().await;
        let res = delete_node_locked(&mut inner, id).await;
        self.shared.publish(&inner);
        res
    }

    /// Load `doc` into an empty, stopped control plane. Either the whole
    /// document is taken or nothing is.
    pub async fn import_topology(&self, doc: TopologyDocument) -> Result<(usize, usize)> {
        let mut inner = self.shared.inner.lock().await;
        if inner.is_started() {
            return Err(TopologyError::Conflict(
                "stop the network before importing".to_string(),
            ));
        }
        if !inner.store.is_empty() {
            return Err(TopologyError::Conflict(
                "import needs an empty topology; full-reset first".to_string(),
            ));
        }

        let store = doc.into_store()?;
        let counts = (store.node_count(), store.link_count());
        inner.store = store;
        inner.stale = true;
        info!(nodes = counts.0, links = counts.1, "topology imported");
        self.shared.publish(&inner);
        Ok(counts)
    }
}

impl Shared {
    async fn upsert_locked(&self, inner: &mut Inner, node: Node) -> Result<Node> {
        let outcome = inner.store.upsert(node)?;
        let current = outcome.current().clone();
        if !inner.is_started() {
            inner.stale = true;
            debug!(id = current.id(), kind = %current.kind(), "node stored");
            return Ok(current);
        }

        let mirrored = match &outcome {
            Upsert::Inserted(node) => mirror_insert(inner, node.clone()).await,
            Upsert::Replaced { previous, current } => match classify(previous, current) {
                Ok(change) => mirror_replace(inner, previous, current, change).await,
                Err(err) => Err(err),
            },
        };

        if let Err(err) = mirrored {
            match outcome {
                Upsert::Inserted(node) => {
                    let _ = inner.store.remove_node(node.id());
                }
                Upsert::Replaced { previous, .. } => inner.store.put(previous),
            }
            if inner.stale {
                warn!(
                    id = current.id(),
                    "live network no longer matches the topology, stopping it"
                );
                let _ = self.stop_locked(inner).await;
            }
            return Err(err);
        }
        info!(id = current.id(), kind = %current.kind(), "node applied to live network");
        Ok(current)
    }
}

async fn mirror_insert(inner: &mut Inner, node: Node) -> Result<()> {
    let id = node.id().to_string();
    let controller = match &node {
        Node::Switch(sw) => sw.controller_id.clone(),
        _ => None,
    };
    adapter::call(inner, "add node", move |net| {
        net.add_node(&node)?;
        let started = match node.kind() {
            NodeKind::Controller => net.start_controller(&id),
            NodeKind::Switch => net.start_switch(&id, controller.as_deref()),
            _ => Ok(()),
        };
        if let Err(err) = started {
            let _ = net.remove_node(&id);
            return Err(err.context(format!("start '{id}'")));
        }
        Ok(())
    })
    .await
}

async fn mirror_replace(
    inner: &mut Inner,
    previous: &Node,
    current: &Node,
    change: Change,
) -> Result<()> {
    let id = current.id().to_string();
    match change {
        Change::None => Ok(()),
        Change::Addressing => {
            let node = current.clone();
            adapter::call(inner, "configure host", move |net| net.configure_host(&node)).await
        }
        Change::Controller(controller) => {
            adapter::call(inner, "restart switch", move |net| {
                net.start_switch(&id, controller.as_deref())
            })
            .await
        }
        Change::Relaunch => {
            let (old, new) = (previous.clone(), current.clone());
            let switches = inner.store.switches_of(&id);
            let outcome = adapter::call(inner, "relaunch controller", move |net| {
                Ok(relaunch(net, &old, &new, &switches))
            })
            .await?;
            match outcome {
                Relaunch::Done => Ok(()),
                Relaunch::Reverted(err) => Err(TopologyError::engine("relaunch controller", err)),
                Relaunch::Diverged(err) => {
                    inner.stale = true;
                    Err(TopologyError::engine("relaunch controller", err))
                }
            }
        }
    }
}

enum Relaunch {
    Done,
    /// Failed; the previous controller runs again.
    Reverted(anyhow::Error),
    /// Failed, and the previous controller could not be brought back.
    Diverged(anyhow::Error),
}

/// Start controller `id` and point `switches` at it.
fn connect(net: &mut dyn LiveNetwork, id: &str, switches: &[String]) -> anyhow::Result<()> {
    net.start_controller(id)
        .with_context(|| format!("start controller '{id}'"))?;
    for sw in switches {
        net.start_switch(sw, Some(id))
            .with_context(|| format!("reconnect switch '{sw}'"))?;
    }
    Ok(())
}

/// Replace the declaration of a running controller and restart it with its
/// switches. On failure the previous declaration is put back and restarted.
fn relaunch(
    net: &mut dyn LiveNetwork,
    previous: &Node,
    current: &Node,
    switches: &[String],
) -> Relaunch {
    let id = current.id();
    if let Err(err) = net.remove_node(id) {
        return Relaunch::Reverted(err.context(format!("retire controller '{id}'")));
    }

    let err = match net.add_node(current) {
        Err(err) => err,
        Ok(()) => match connect(net, id, switches) {
            Ok(()) => return Relaunch::Done,
            Err(err) => match net.remove_node(id) {
                Ok(()) => err,
                Err(undo) => {
                    warn!(controller = id, error = %format!("{undo:#}"), "cannot retire new controller");
                    return Relaunch::Diverged(err);
                }
            },
        },
    };

    match net.add_node(previous).and_then(|()| connect(net, id, switches)) {
        Ok(()) => {
            debug!(controller = id, "previous controller restored");
            Relaunch::Reverted(err)
        }
        Err(undo) => {
            warn!(controller = id, error = %format!("{undo:#}"), "cannot restore previous controller");
            Relaunch::Diverged(err)
        }
    }
}

async fn update_host_locked(inner: &mut Inner, id: &str, patch: &HostPatch) -> Result<Node> {
    let previous = inner
        .store
        .node(id)
        .ok_or_else(|| TopologyError::not_found("node", id))?;
    let updated = inner.store.update_host(id, patch)?;
    if !patch.touches_addressing() {
        return Ok(updated);
    }
    if !inner.is_started() {
        inner.stale = true;
        return Ok(updated);
    }

    let node = updated.clone();
    if let Err(err) = adapter::call(inner, "configure host", move |net| net.configure_host(&node)).await
    {
        inner.store.put(previous);
        return Err(err);
    }
    Ok(updated)
}

async fn associate_locked(inner: &mut Inner, switch_id: &str, controller_id: &str) -> Result<Switch> {
    let updated = inner.store.associate(switch_id, controller_id)?;
    if !inner.is_started() {
        inner.stale = true;
        return Ok(updated);
    }

    let (sw, ctl) = (switch_id.to_string(), controller_id.to_string());
    let res = adapter::call(inner, "associate", move |net| net.start_switch(&sw, Some(&ctl))).await;
    if let Err(err) = res {
        let _ = inner.store.disassociate(switch_id, None);
        return Err(err);
    }
    info!(switch = switch_id, controller = controller_id, "switch associated");
    Ok(updated)
}

async fn disassociate_locked(
    inner: &mut Inner,
    switch_id: &str,
    controller_id: Option<&str>,
) -> Result<Switch> {
    let previous = inner.store.switch(switch_id).cloned();
    let updated = inner.store.disassociate(switch_id, controller_id)?;
    if !inner.is_started() {
        inner.stale = true;
        return Ok(updated);
    }

    let sw = switch_id.to_string();
    let res = adapter::call(inner, "disassociate", move |net| net.start_switch(&sw, None)).await;
    if let Err(err) = res {
        if let Some(previous) = previous {
            inner.store.put(previous.into());
        }
        return Err(err);
    }
    info!(switch = switch_id, "switch disassociated");
    Ok(updated)
}

async fn create_link_locked(inner: &mut Inner, a: &str, b: &str, options: LinkOptions) -> Result<Link> {
    let link = inner.store.add_link(a, b, options)?;
    if !inner.is_started() {
        inner.stale = true;
        return Ok(link);
    }

    let declared = link.clone();
    if let Err(err) = adapter::call(inner, "add link", move |net| net.add_link(&declared)).await {
        let _ = inner.store.remove_link(a, b);
        return Err(err);
    }
    info!(link = %link.key, "link applied to live network");
    Ok(link)
}

async fn update_link_locked(inner: &mut Inner, a: &str, b: &str, options: LinkOptions) -> Result<Link> {
    let old = inner.store.update_link(a, b, options.clone())?;
    let link = Link {
        key: LinkKey::new(a, b),
        options,
    };
    if !inner.is_started() {
        inner.stale = true;
        return Ok(link);
    }

    let declared = link.clone();
    if let Err(err) = adapter::call(inner, "configure link", move |net| net.configure_link(&declared)).await
    {
        inner.store.put_link(Link {
            key: link.key.clone(),
            options: old,
        });
        return Err(err);
    }
    Ok(link)
}

async fn delete_link_locked(inner: &mut Inner, a: &str, b: &str) -> Result<Link> {
    let link = inner.store.remove_link(a, b)?;
    if !inner.is_started() {
        inner.stale = true;
        return Ok(link);
    }

    let key = link.key.clone();
    if let Err(err) = adapter::call(inner, "remove link", move |net| net.remove_link(&key)).await {
        inner.store.put_link(link);
        return Err(err);
    }
    Ok(link)
}

async fn delete_node_locked(inner: &mut Inner, id: &str) -> Result<Removal> {
    let removal = inner.store.remove_node(id)?;
    if !inner.is_started() {
        inner.stale = true;
        return Ok(removal);
    }

    let node_id = id.to_string();
    let links = removal.links.clone();
    let orphans = removal.disassociated.clone();
    let res = adapter::call(inner, "remove node", move |net| {
        let mut removed = Vec::with_capacity(links.len());
        let res = (|| {
            for link in &links {
                net.remove_link(&link.key)
                    .with_context(|| format!("remove link {}", link.key))?;
                removed.push(link);
            }
            for sw in &orphans {
                net.start_switch(sw, None)
                    .with_context(|| format!("detach switch '{sw}'"))?;
            }
            net.remove_node(&node_id)
        })();
        if res.is_err() {
            // put back what was already taken down, so the adapter
            // matches the restored store
            for link in removed {
                let _ = net.add_link(link);
            }
            for sw in &orphans {
                let _ = net.start_switch(sw, Some(&node_id));
            }
        }
        res
    })
    .await;

    if let Err(err) = res {
        warn!(id, error = %err, "node removal failed on live network, restoring");
        inner.store.restore(removal);
        return Err(err);
    }
    info!(
        id,
        links = removal.links.len(),
        disassociated = removal.disassociated.len(),
        "node removed"
    );
    Ok(removal)
}
