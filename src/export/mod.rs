//! Topology documents and shell script export.
//!
//! A [`TopologyDocument`] is the JSON form of the store: one array per node
//! kind plus the links as `{from, to, options}`. Importing replays the
//! document through the same validation as live mutations.

mod script;

use std::fs;
use std::path::Path;

use anyhow::Context;
pub use script::render_script;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TopologyError};
use crate::lifecycle::ControlPlane;
use crate::model::{Controller, Host, LinkOptions, Nat, Node, Router, Switch};
use crate::topology::TopologyStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkEntry {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub options: LinkOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyDocument {
    #[serde(default)]
    pub controllers: Vec<Controller>,
    #[serde(default)]
    pub switches: Vec<Switch>,
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub routers: Vec<Router>,
    #[serde(default)]
    pub nats: Vec<Nat>,
    #[serde(default)]
    pub links: Vec<LinkEntry>,
}

impl TopologyDocument {
    pub fn from_store(store: &TopologyStore) -> Self {
        Self {
            controllers: store.controllers().cloned().collect(),
            switches: store.switches().cloned().collect(),
            hosts: store.hosts().cloned().collect(),
            routers: store.routers().cloned().collect(),
            nats: store.nats().cloned().collect(),
            links: store
                .links()
                .into_iter()
                .map(|link| {
                    let (from, to) = link.key.endpoints();
                    LinkEntry {
                        from: from.to_string(),
                        to: to.to_string(),
                        options: link.options,
                    }
                })
                .collect(),
        }
    }

    /// Replay the document into a fresh store in dependency order. The
    /// first rejected entity aborts the whole import.
    pub fn into_store(self) -> Result<TopologyStore> {
        let mut store = TopologyStore::new();
        let nodes = self
            .controllers
            .into_iter()
            .map(Node::from)
            .chain(self.switches.into_iter().map(Node::from))
            .chain(self.hosts.into_iter().map(Node::from))
            .chain(self.routers.into_iter().map(Node::from))
            .chain(self.nats.into_iter().map(Node::from));

        for node in nodes {
            let id = node.id().to_string();
            if store.contains(&id) {
                return Err(TopologyError::Conflict(format!(
                    "id '{id}' appears twice in the document"
                )));
            }
            store.upsert(node)?;
        }
        for entry in self.links {
            store.add_link(&entry.from, &entry.to, entry.options)?;
        }
        Ok(store)
    }

    pub fn node_count(&self) -> usize {
        self.controllers.len()
            + self.switches.len()
            + self.hosts.len()
            + self.routers.len()
            + self.nats.len()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| TopologyError::Validation(format!("malformed topology document: {e}")))
    }

    pub fn to_json(&self) -> String {
        // plain data with string keys, serialization cannot fail
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("read topology from {}", path.display()))?;
        Ok(Self::from_json(&json)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        fs::write(path, self.to_json())
            .with_context(|| format!("write topology to {}", path.display()))
    }
}

impl ControlPlane {
    pub fn export_topology(&self) -> TopologyDocument {
        TopologyDocument::from_store(&self.snapshot().store)
    }

    /// Shell script that recreates the current topology by hand.
    pub fn export_script(&self) -> Result<String> {
        render_script(&self.snapshot().store)
            .map_err(|e| TopologyError::Validation(format!("script export: {e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ControllerKind;

    fn sample_store() -> TopologyStore {
        let mut store = TopologyStore::new();
        store
            .upsert(Node::from(Controller {
                kind: ControllerKind::Ryu,
                ..Controller::new("c0")
            }))
            .unwrap();
        store
            .upsert(Node::from(Switch {
                controller_id: Some("c0".into()),
                ..Switch::new("s1")
            }))
            .unwrap();
        store
            .upsert(Node::from(Host {
                ip: Some("10.0.0.1/24".parse().unwrap()),
                ..Host::new("h1")
            }))
            .unwrap();
        store
            .add_link(
                "h1",
                "s1",
                LinkOptions {
                    delay: Some(5),
                    enabled: true,
                    ..Default::default()
                },
            )
            .unwrap();
        store
    }

    #[test]
    fn test_document_reproduces_store() {
        let store = sample_store();
        let doc = TopologyDocument::from_store(&store);
        assert_eq!(doc.node_count(), 3);
        assert_eq!(doc.links.len(), 1);

        let json = doc.to_json();
        let back = TopologyDocument::from_json(&json).unwrap().into_store().unwrap();
        assert_eq!(back, store);
    }

    #[test]
    fn test_document_json_shape() {
        let doc = TopologyDocument::from_store(&sample_store());
        let value: serde_json::Value = serde_json::from_str(&doc.to_json()).unwrap();
        assert_eq!(value["switches"][0]["controllerId"], "c0");
        assert_eq!(value["links"][0]["from"], "h1");
        assert_eq!(value["links"][0]["to"], "s1");
        assert_eq!(value["links"][0]["options"]["delay"], 5);
        assert!(value["nats"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_import_rejects_dangling_reference() {
        let json = r#"{
            "switches": [{"id": "s1", "controllerId": "c9"}]
        }"#;
        let doc = TopologyDocument::from_json(json).unwrap();
        assert!(matches!(doc.into_store(), Err(TopologyError::NotFound(_))));
    }

    #[test]
    fn test_import_rejects_duplicate_ids() {
        let json = r#"{
            "hosts": [{"id": "h1"}, {"id": "h1"}]
        }"#;
        let doc = TopologyDocument::from_json(json).unwrap();
        assert!(matches!(doc.into_store(), Err(TopologyError::Conflict(_))));
    }

    #[test]
    fn test_malformed_json_is_validation_error() {
        assert!(matches!(
            TopologyDocument::from_json("{not json"),
            Err(TopologyError::Validation(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topo.json");
        let doc = TopologyDocument::from_store(&sample_store());
        doc.save(&path).unwrap();
        assert_eq!(TopologyDocument::load(&path).unwrap(), doc);
    }
}
