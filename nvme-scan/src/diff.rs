//! Differential scan: what appeared, disappeared or changed
//!
//! The previous snapshot is walked forward in its own order; anything it
//! does not know about is reported as added, in the new snapshot's order.
//! Controllers are keyed by bus address, namespaces by block node name.
//! A removed entry may be detached hardware or a device that became
//! invisible (permissions, driver unbind); the two are not told apart.

use crate::model::{ControllerRecord, NamespaceRecord, TopologySnapshot};
use serde::{Deserialize, Serialize};

/// One differing field, rendered as text on both sides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: String,
    pub after: String,
}

/// Device present in both snapshots with differing fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceChange {
    /// Bus address for controllers, block node for namespaces
    pub key: String,
    pub fields: Vec<FieldChange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added_controllers: Vec<String>,
    pub removed_controllers: Vec<String>,
    pub changed_controllers: Vec<DeviceChange>,
    pub added_namespaces: Vec<String>,
    pub removed_namespaces: Vec<String>,
    pub changed_namespaces: Vec<DeviceChange>,
}

impl ChangeSet {
    /// Compare `current` against the `previous` baseline
    pub fn between(previous: &TopologySnapshot, current: &TopologySnapshot) -> Self {
        let mut changes = ChangeSet::default();

        for old in previous.controllers() {
            match current.controller_by_bdf(old.bdf()) {
                None => changes.removed_controllers.push(old.bdf().to_string()),
                Some(new) => {
                    let fields = controller_fields(old, new);
                    if !fields.is_empty() {
                        changes.changed_controllers.push(DeviceChange {
                            key: old.bdf().to_string(),
                            fields,
                        });
                    }
                }
            }
        }
        changes.added_controllers = current
            .controllers()
            .iter()
            .filter(|c| previous.controller_by_bdf(c.bdf()).is_none())
            .map(|c| c.bdf().to_string())
            .collect();

        for old in previous.namespaces() {
            match current.namespace_by_node(&old.node) {
                None => changes.removed_namespaces.push(old.node.clone()),
                Some(new) => {
                    let fields = namespace_fields(old, new);
                    if !fields.is_empty() {
                        changes.changed_namespaces.push(DeviceChange {
                            key: old.node.clone(),
                            fields,
                        });
                    }
                }
            }
        }
        changes.added_namespaces = current
            .namespaces()
            .iter()
            .filter(|ns| previous.namespace_by_node(&ns.node).is_none())
            .map(|ns| ns.node.clone())
            .collect();

        changes
    }

    pub fn is_empty(&self) -> bool {
        self.added_controllers.is_empty()
            && self.removed_controllers.is_empty()
            && self.changed_controllers.is_empty()
            && self.added_namespaces.is_empty()
            && self.removed_namespaces.is_empty()
            && self.changed_namespaces.is_empty()
    }
}

impl TopologySnapshot {
    /// Same controllers and namespace assignments, ignoring enumeration order
    pub fn same_topology(&self, other: &TopologySnapshot) -> bool {
        ChangeSet::between(self, other).is_empty()
    }
}

fn push_if_differs(fields: &mut Vec<FieldChange>, field: &str, before: String, after: String) {
    if before != after {
        fields.push(FieldChange {
            field: field.to_string(),
            before,
            after,
        });
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn controller_fields(old: &ControllerRecord, new: &ControllerRecord) -> Vec<FieldChange> {
    let mut fields = Vec::new();
    let old_id = old.identify.as_ref();
    let new_id = new.identify.as_ref();

    push_if_differs(&mut fields, "node", old.node.clone(), new.node.clone());
    push_if_differs(&mut fields, "upstream", old.upstream().to_string(), new.upstream().to_string());
    push_if_differs(&mut fields, "cntlid", opt(old.cntlid), opt(new.cntlid));
    push_if_differs(&mut fields, "serial", opt(old_id.map(|i| i.serial())), opt(new_id.map(|i| i.serial())));
    push_if_differs(&mut fields, "model", opt(old_id.map(|i| i.model())), opt(new_id.map(|i| i.model())));
    push_if_differs(
        &mut fields,
        "firmware",
        opt(old_id.map(|i| i.firmware())),
        opt(new_id.map(|i| i.firmware())),
    );

    let mut old_ns = old.namespace_ids();
    let mut new_ns = new.namespace_ids();
    old_ns.sort_unstable();
    new_ns.sort_unstable();
    push_if_differs(&mut fields, "namespaces", format!("{:?}", old_ns), format!("{:?}", new_ns));
    fields
}

fn namespace_fields(old: &NamespaceRecord, new: &NamespaceRecord) -> Vec<FieldChange> {
    let mut fields = Vec::new();
    let old_id = old.identify.as_ref();
    let new_id = new.identify.as_ref();

    push_if_differs(&mut fields, "bdf", old.bdf().to_string(), new.bdf().to_string());
    push_if_differs(&mut fields, "nsid", opt(old.nsid), opt(new.nsid));
    push_if_differs(&mut fields, "attached", old.attached.to_string(), new.attached.to_string());
    push_if_differs(&mut fields, "nsze", opt(old_id.map(|i| i.nsze)), opt(new_id.map(|i| i.nsze)));
    push_if_differs(&mut fields, "ncap", opt(old_id.map(|i| i.ncap)), opt(new_id.map(|i| i.ncap)));
    fields
}
