//! Topology records and the scan snapshot
//!
//! A snapshot owns an ordered controller list and namespace list. The three
//! lookup maps (bus address, controller node, namespace block node) are
//! derived from those lists and rebuilt wholesale, never patched.

use crate::pcie::BusPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Identify Controller payload (`nvme id-ctrl -o json`)
///
/// Only the fields the engine relies on are typed; everything else is kept
/// verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerIdentify {
    pub cntlid: u16,
    pub sn: String,
    pub mn: String,
    #[serde(default)]
    pub fr: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ControllerIdentify {
    // nvme-cli pads these ASCII fields with spaces
    pub fn serial(&self) -> &str {
        self.sn.trim()
    }

    pub fn model(&self) -> &str {
        self.mn.trim()
    }

    pub fn firmware(&self) -> &str {
        self.fr.trim()
    }
}

/// Identify Namespace payload (`nvme id-ns -o json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceIdentify {
    #[serde(default)]
    pub nsze: u64,
    #[serde(default)]
    pub ncap: u64,
    #[serde(default)]
    pub nuse: u64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One namespace block node visible to the OS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceRecord {
    /// Kernel block node name, e.g. `nvme0n1`
    pub node: String,
    pub path: BusPath,
    /// The node exists, so the OS has the namespace attached
    pub attached: bool,
    pub nsid: Option<u32>,
    pub identify: Option<NamespaceIdentify>,
}

impl NamespaceRecord {
    /// Discovered but not yet correlated with a controller listing
    pub fn discovered(node: impl Into<String>, path: BusPath) -> Self {
        Self {
            node: node.into(),
            path,
            attached: true,
            nsid: None,
            identify: None,
        }
    }

    /// Transition to the identified state
    pub fn identify(&mut self, nsid: u32, identify: Option<NamespaceIdentify>) {
        self.nsid = Some(nsid);
        self.identify = identify;
    }

    pub fn is_identified(&self) -> bool {
        self.nsid.is_some()
    }

    pub fn bdf(&self) -> &str {
        self.path.bdf()
    }
}

/// Namespace as listed by its controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceEntry {
    pub nsid: u32,
    pub index: u32,
    pub identify: Option<NamespaceIdentify>,
}

/// One NVMe controller: one PCIe function, one char node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerRecord {
    /// Kernel char node name, e.g. `nvme0`
    pub node: String,
    pub path: BusPath,
    pub cntlid: Option<u16>,
    pub identify: Option<ControllerIdentify>,
    pub namespaces: Vec<NamespaceEntry>,
    /// Controller IDs in the subsystem, when the drive supports listing them
    #[serde(default)]
    pub controller_ids: Vec<u16>,
}

impl ControllerRecord {
    pub fn bdf(&self) -> &str {
        self.path.bdf()
    }

    pub fn upstream(&self) -> &str {
        self.path.upstream()
    }

    pub fn namespace(&self, nsid: u32) -> Option<&NamespaceEntry> {
        self.namespaces.iter().find(|ns| ns.nsid == nsid)
    }

    pub fn namespace_ids(&self) -> Vec<u32> {
        self.namespaces.iter().map(|ns| ns.nsid).collect()
    }
}

#[derive(Deserialize)]
struct SnapshotData {
    scan_id: Uuid,
    host: String,
    captured_at: DateTime<Utc>,
    controllers: Vec<ControllerRecord>,
    namespaces: Vec<NamespaceRecord>,
}

impl From<SnapshotData> for TopologySnapshot {
    fn from(data: SnapshotData) -> Self {
        let mut snapshot = TopologySnapshot {
            scan_id: data.scan_id,
            host: data.host,
            captured_at: data.captured_at,
            controllers: data.controllers,
            namespaces: data.namespaces,
            by_bdf: HashMap::new(),
            by_node: HashMap::new(),
            by_block: HashMap::new(),
        };
        snapshot.rebuild_indices();
        snapshot
    }
}

/// Result of one discovery pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SnapshotData")]
pub struct TopologySnapshot {
    pub scan_id: Uuid,
    pub host: String,
    pub captured_at: DateTime<Utc>,
    controllers: Vec<ControllerRecord>,
    namespaces: Vec<NamespaceRecord>,
    #[serde(skip)]
    by_bdf: HashMap<String, usize>,
    #[serde(skip)]
    by_node: HashMap<String, usize>,
    #[serde(skip)]
    by_block: HashMap<String, usize>,
}

impl TopologySnapshot {
    pub fn new(
        host: impl Into<String>,
        controllers: Vec<ControllerRecord>,
        namespaces: Vec<NamespaceRecord>,
    ) -> Self {
        SnapshotData {
            scan_id: Uuid::new_v4(),
            host: host.into(),
            captured_at: Utc::now(),
            controllers,
            namespaces,
        }
        .into()
    }

    /// Derive all lookup maps from the record lists
    ///
    /// Index values always point into `controllers`, so no key can dangle.
    /// A namespace whose bus address matches no controller stays in the
    /// namespace list without a block-node entry.
    fn rebuild_indices(&mut self) {
        self.by_bdf.clear();
        self.by_node.clear();
        self.by_block.clear();

        for (idx, ctrl) in self.controllers.iter().enumerate() {
            self.by_bdf.insert(ctrl.bdf().to_string(), idx);
            self.by_node.insert(ctrl.node.clone(), idx);
        }
        for ns in &self.namespaces {
            if let Some(&idx) = self.by_bdf.get(ns.bdf()) {
                self.by_block.insert(ns.node.clone(), idx);
            }
        }
    }

    /// Controllers in enumeration order
    pub fn controllers(&self) -> &[ControllerRecord] {
        &self.controllers
    }

    /// Namespace block nodes in enumeration order
    pub fn namespaces(&self) -> &[NamespaceRecord] {
        &self.namespaces
    }

    pub fn controller_by_bdf(&self, bdf: &str) -> Option<&ControllerRecord> {
        self.by_bdf.get(bdf).map(|&idx| &self.controllers[idx])
    }

    pub fn controller_by_node(&self, node: &str) -> Option<&ControllerRecord> {
        self.by_node.get(node).map(|&idx| &self.controllers[idx])
    }

    /// Owning controller of a namespace block node
    pub fn controller_by_block(&self, block_node: &str) -> Option<&ControllerRecord> {
        self.by_block.get(block_node).map(|&idx| &self.controllers[idx])
    }

    pub fn namespace_by_node(&self, block_node: &str) -> Option<&NamespaceRecord> {
        self.namespaces.iter().find(|ns| ns.node == block_node)
    }

    pub fn bdf_keys(&self) -> impl Iterator<Item = &str> {
        self.by_bdf.keys().map(String::as_str)
    }

    pub fn node_keys(&self) -> impl Iterator<Item = &str> {
        self.by_node.keys().map(String::as_str)
    }

    pub fn block_keys(&self) -> impl Iterator<Item = &str> {
        self.by_block.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty() && self.namespaces.is_empty()
    }

    /// Copy keeping the controllers accepted by `keep` and the namespaces
    /// on their bus addresses; id, host and capture time are unchanged
    pub fn restricted_to<F>(&self, keep: F) -> TopologySnapshot
    where
        F: Fn(&ControllerRecord) -> bool,
    {
        let controllers: Vec<ControllerRecord> =
            self.controllers.iter().filter(|c| keep(c)).cloned().collect();
        let namespaces = self
            .namespaces
            .iter()
            .filter(|ns| controllers.iter().any(|c| c.bdf() == ns.bdf()))
            .cloned()
            .collect();
        SnapshotData {
            scan_id: self.scan_id,
            host: self.host.clone(),
            captured_at: self.captured_at,
            controllers,
            namespaces,
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn controller(node: &str, raw_path: &str, nsids: &[u32]) -> ControllerRecord {
        ControllerRecord {
            node: node.to_string(),
            path: BusPath::from_name_path(raw_path, "nvme").unwrap(),
            cntlid: Some(1),
            identify: None,
            namespaces: nsids
                .iter()
                .enumerate()
                .map(|(i, &nsid)| NamespaceEntry {
                    nsid,
                    index: i as u32,
                    identify: None,
                })
                .collect(),
            controller_ids: Vec::new(),
        }
    }

    fn namespace(node: &str, raw_path: &str) -> NamespaceRecord {
        NamespaceRecord::discovered(node, BusPath::from_name_path(raw_path, "nvme").unwrap())
    }

    #[test]
    fn test_identify_payload_keeps_unknown_fields() {
        let payload = json!({
            "vid": 5197, "sn": "S4EWNX0N123456  ", "mn": "Samsung SSD 980 PRO 1TB ",
            "fr": "5B2QGXA7", "cntlid": 6, "ver": 66304
        });
        let id: ControllerIdentify = serde_json::from_value(payload).unwrap();
        assert_eq!(id.cntlid, 6);
        assert_eq!(id.serial(), "S4EWNX0N123456");
        assert_eq!(id.model(), "Samsung SSD 980 PRO 1TB");
        assert_eq!(id.extra.get("vid"), Some(&json!(5197)));
    }

    #[test]
    fn test_namespace_state_transition() {
        let mut ns = namespace("nvme0n1", "/devices/pci0000:00/0000:01:00.0/nvme/nvme0/nvme0n1");
        assert!(ns.attached);
        assert!(!ns.is_identified());
        ns.identify(1, None);
        assert_eq!(ns.nsid, Some(1));
        assert!(ns.is_identified());
    }

    #[test]
    fn test_indices_resolve_to_listed_controllers() {
        let snap = TopologySnapshot::new(
            "host",
            vec![
                controller("nvme0", "/devices/pci0000:00/0000:01:00.0/nvme/nvme0", &[1]),
                controller("nvme1", "/devices/pci0000:00/0000:02:00.0/nvme/nvme1", &[1]),
            ],
            vec![
                namespace("nvme0n1", "/devices/pci0000:00/0000:01:00.0/nvme/nvme0/nvme0n1"),
                namespace("nvme1n1", "/devices/pci0000:00/0000:02:00.0/nvme/nvme1/nvme1n1"),
            ],
        );

        for ns in snap.namespaces() {
            let owner = snap.controller_by_block(&ns.node).unwrap();
            assert_eq!(owner.bdf(), ns.bdf());
            assert!(snap.controller_by_bdf(ns.bdf()).is_some());
        }
        assert_eq!(snap.controller_by_node("nvme1").unwrap().bdf(), "0000:02:00.0");
        assert_eq!(snap.bdf_keys().count(), 2);
    }

    #[test]
    fn test_orphan_namespace_has_no_block_entry() {
        let snap = TopologySnapshot::new(
            "host",
            vec![controller("nvme0", "/devices/pci0000:00/0000:01:00.0/nvme/nvme0", &[])],
            vec![namespace("nvme5n1", "/devices/pci0000:00/0000:09:00.0/nvme/nvme5/nvme5n1")],
        );
        assert_eq!(snap.namespaces().len(), 1);
        assert!(snap.controller_by_block("nvme5n1").is_none());
        assert_eq!(snap.block_keys().count(), 0);
        assert!(snap.controllers()[0].namespaces.is_empty());
    }

    #[test]
    fn test_deserialize_rebuilds_indices() {
        let snap = TopologySnapshot::new(
            "host",
            vec![controller("nvme0", "/devices/pci0000:00/0000:01:00.0/nvme/nvme0", &[1])],
            vec![namespace("nvme0n1", "/devices/pci0000:00/0000:01:00.0/nvme/nvme0/nvme0n1")],
        );
        let text = serde_json::to_string(&snap).unwrap();
        assert!(!text.contains("by_bdf"));

        let loaded: TopologySnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(loaded.scan_id, snap.scan_id);
        assert_eq!(loaded.controller_by_block("nvme0n1").unwrap().node, "nvme0");
        assert_eq!(loaded.controller_by_bdf("0000:01:00.0").unwrap().namespace_ids(), vec![1]);
    }

    #[test]
    fn test_restricted_copy_keeps_identity_and_owned_namespaces() {
        let snap = TopologySnapshot::new(
            "host",
            vec![
                controller("nvme0", "/devices/pci0000:00/0000:01:00.0/nvme/nvme0", &[1]),
                controller("nvme1", "/devices/pci0000:00/0000:02:00.0/nvme/nvme1", &[1]),
            ],
            vec![
                namespace("nvme0n1", "/devices/pci0000:00/0000:01:00.0/nvme/nvme0/nvme0n1"),
                namespace("nvme1n1", "/devices/pci0000:00/0000:02:00.0/nvme/nvme1/nvme1n1"),
            ],
        );

        let one = snap.restricted_to(|c| c.bdf() == "0000:02:00.0");
        assert_eq!(one.scan_id, snap.scan_id);
        assert_eq!(one.captured_at, snap.captured_at);
        assert_eq!(one.controllers().len(), 1);
        assert_eq!(one.namespaces().len(), 1);
        assert_eq!(one.controller_by_block("nvme1n1").unwrap().node, "nvme1");
        assert!(one.controller_by_bdf("0000:01:00.0").is_none());
        assert!(one.namespace_by_node("nvme0n1").is_none());
    }
}
