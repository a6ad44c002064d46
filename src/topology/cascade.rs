//! Node removal with its follow-on effects.

use super::TopologyStore;
use crate::error::{Result, TopologyError};
use crate::model::{Link, Node, NodeKind};

/// Everything a node removal took out of the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Removal {
    pub node: Node,
    /// Links that touched the node, removed before it.
    pub links: Vec<Link>,
    /// Switches whose association with a removed controller was cleared.
    pub disassociated: Vec<String>,
}

impl TopologyStore {
    /// Remove `id`, cascading so that nothing refers to it afterwards.
    ///
    /// Links touching the node go first. Removing a controller clears the
    /// association of every switch bound to it.
    pub fn remove_node(&mut self, id: &str) -> Result<Removal> {
        let node = self
            .node(id)
            .ok_or_else(|| TopologyError::not_found("node", id))?;

        let links = self.links_of(id);
        for link in &links {
            self.links.remove(&link.key);
        }

        let mut disassociated = Vec::new();
        if node.kind() == NodeKind::Controller {
            for sw in self.switches.values_mut() {
                if sw.controller_id.as_deref() == Some(id) {
                    sw.controller_id = None;
                    disassociated.push(sw.id.clone());
                }
            }
        }

        match node.kind() {
            NodeKind::Controller => {
                self.controllers.remove(id);
            }
            NodeKind::Switch => {
                self.switches.remove(id);
            }
            NodeKind::Host => {
                self.hosts.remove(id);
            }
            NodeKind::Router => {
                self.routers.remove(id);
            }
            NodeKind::Nat => {
                self.nats.remove(id);
            }
        }

        Ok(Removal {
            node,
            links,
            disassociated,
        })
    }

    /// Put back what [`remove_node`](Self::remove_node) took out.
    pub(crate) fn restore(&mut self, removal: Removal) {
        let controller_id = removal.node.id().to_string();
        self.put(removal.node);
        for sw_id in removal.disassociated {
            if let Some(sw) = self.switches.get_mut(&sw_id) {
                sw.controller_id = Some(controller_id.clone());
            }
        }
        for link in removal.links {
            self.put_link(link);
        }
    }
}
