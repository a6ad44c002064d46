//! Switch to controller association.
//!
//! A switch is either unassociated or associated with exactly one
//! controller. Moving it to another controller takes an explicit
//! disassociate first.

use super::TopologyStore;
use crate::error::{Result, TopologyError};
use crate::model::Switch;

impl TopologyStore {
    /// Bind `switch_id` to `controller_id`. Returns the updated switch.
    pub fn associate(&mut self, switch_id: &str, controller_id: &str) -> Result<Switch> {
        if !self.controllers.contains_key(controller_id) {
            return Err(TopologyError::not_found("controller", controller_id));
        }
        let sw = self
            .switches
            .get_mut(switch_id)
            .ok_or_else(|| TopologyError::not_found("switch", switch_id))?;

        if let Some(current) = &sw.controller_id {
            return Err(TopologyError::Conflict(format!(
                "switch '{switch_id}' is already associated with '{current}'"
            )));
        }
        if sw.switch_type.standalone() {
            return Err(TopologyError::Validation(format!(
                "switch '{switch_id}' is an ovsbridge and cannot have a controller"
            )));
        }

        sw.controller_id = Some(controller_id.to_string());
        Ok(sw.clone())
    }

    /// Clear the association of `switch_id`.
    ///
    /// When `expected` is given, the switch must currently be associated
    /// with that controller.
    pub fn disassociate(&mut self, switch_id: &str, expected: Option<&str>) -> Result<Switch> {
        let sw = self
            .switches
            .get_mut(switch_id)
            .ok_or_else(|| TopologyError::not_found("switch", switch_id))?;

        match (sw.controller_id.as_deref(), expected) {
            (None, _) => {
                return Err(TopologyError::Conflict(format!(
                    "switch '{switch_id}' is not associated"
                )));
            }
            (Some(current), Some(wanted)) if current != wanted => {
                return Err(TopologyError::Conflict(format!(
                    "switch '{switch_id}' is associated with '{current}', not '{wanted}'"
                )));
            }
            _ => {}
        }

        sw.controller_id = None;
        Ok(sw.clone())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::TopologyError;
    use crate::model::{Controller, Node, Switch, SwitchType};
    use crate::topology::TopologyStore;

    fn store() -> TopologyStore {
        let mut store = TopologyStore::new();
        store.upsert(Node::Controller(Controller::new("c1"))).unwrap();
        let c2 = Controller {
            port: 6654,
            ..Controller::new("c2")
        };
        store.upsert(Node::Controller(c2)).unwrap();
        store.upsert(Node::Switch(Switch::new("s1"))).unwrap();
        store
    }

    #[test]
    fn test_single_association() {
        let mut store = store();
        let sw = store.associate("s1", "c1").unwrap();
        assert_eq!(sw.controller_id.as_deref(), Some("c1"));

        let err = store.associate("s1", "c2").unwrap_err();
        assert!(matches!(err, TopologyError::Conflict(_)));
        assert_eq!(
            store.switch("s1").unwrap().controller_id.as_deref(),
            Some("c1")
        );

        store.disassociate("s1", None).unwrap();
        let sw = store.associate("s1", "c2").unwrap();
        assert_eq!(sw.controller_id.as_deref(), Some("c2"));
    }

    #[test]
    fn test_associate_unknown_ids() {
        let mut store = store();
        assert!(matches!(
            store.associate("s9", "c1"),
            Err(TopologyError::NotFound(_))
        ));
        assert!(matches!(
            store.associate("s1", "c9"),
            Err(TopologyError::NotFound(_))
        ));
        assert!(store.switch("s1").unwrap().controller_id.is_none());
    }

    #[test]
    fn test_disassociate_checks_expected_controller() {
        let mut store = store();
        assert!(matches!(
            store.disassociate("s1", None),
            Err(TopologyError::Conflict(_))
        ));

        store.associate("s1", "c1").unwrap();
        assert!(matches!(
            store.disassociate("s1", Some("c2")),
            Err(TopologyError::Conflict(_))
        ));
        store.disassociate("s1", Some("c1")).unwrap();
        assert!(store.switch("s1").unwrap().controller_id.is_none());
    }

    #[test]
    fn test_standalone_bridge_cannot_associate() {
        let mut store = store();
        let bridge = Switch {
            switch_type: SwitchType::OvsBridge,
            ..Switch::new("br0")
        };
        store.upsert(Node::Switch(bridge)).unwrap();
        assert!(matches!(
            store.associate("br0", "c1"),
            Err(TopologyError::Validation(_))
        ));
    }
}
