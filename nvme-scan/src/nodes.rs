//! Device node discovery and PCIe path introspection
//!
//! Handles:
//! - `/dev` node enumeration by class (char controllers, block namespaces)
//! - partition node filtering
//! - udev path lookups by node name and by bus address
//! - `lspci -D` bus inventory

use crate::error::PathError;
use crate::gateway::CommandGateway;
use crate::pcie::BusPath;
use std::collections::BTreeMap;
use tracing::debug;

/// Filter matching "Non-Volatile memory controller" lines
pub const DEFAULT_BUS_FILTER: &str = "Non-";

/// Kind of device node passed to `find -type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Char,
    Block,
}

impl NodeKind {
    fn find_type(self) -> &'static str {
        match self {
            NodeKind::Char => "c",
            NodeKind::Block => "b",
        }
    }
}

/// Kernel name of a node path (`/dev/nvme0n1` -> `nvme0n1`)
pub fn node_name(node: &str) -> &str {
    node.rsplit('/').next().unwrap_or(node)
}

/// Partition nodes (`nvme0n1p1`) look like extra namespaces on kernels that
/// expose them; anything whose instance token splits on `p` is one.
pub fn is_partition_node(node: &str) -> bool {
    let name = node_name(node);
    let token = name.strip_prefix("nvme").unwrap_or(name);
    token.split('p').count() > 1
}

/// `nvme<digits>`: a controller instance, not `nvme-fabrics` and friends
pub fn is_controller_node(node: &str) -> bool {
    node_name(node)
        .strip_prefix("nvme")
        .is_some_and(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
}

/// Multipath namespace heads live under `/devices/virtual/nvme-subsystem/`
/// and carry no bus chain
pub fn is_virtual_path(raw: &str) -> bool {
    raw.contains("/devices/virtual/")
}

/// Controller instance named by a namespace node (`nvme0n1` -> `nvme0`)
pub fn controller_of_namespace(node: &str) -> Option<String> {
    let id = node_name(node).strip_prefix("nvme")?;
    let digits = id.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 || !id[digits..].starts_with('n') {
        return None;
    }
    Some(format!("nvme{}", &id[..digits]))
}

/// Parse `lspci -D` output into `bdf -> description`
///
/// `None` or an empty filter keeps every line.
pub fn parse_bus_inventory(text: &str, filter: Option<&str>) -> BTreeMap<String, String> {
    let filter = filter.filter(|f| !f.is_empty());

    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| filter.map_or(true, |f| line.contains(f)))
        .map(|line| {
            let line = line.trim_end();
            match line.split_once(' ') {
                Some((bdf, title)) => (bdf.trim().to_string(), title.to_string()),
                None => (line.trim().to_string(), String::new()),
            }
        })
        .collect()
}

/// Where to look for nodes and how to anchor by-name paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSearch {
    pub dev_dir: String,
    pub pattern: String,
    pub anchor: String,
}

impl Default for NodeSearch {
    fn default() -> Self {
        Self {
            dev_dir: "/dev".to_string(),
            pattern: "nvme*".to_string(),
            anchor: crate::pcie::DEFAULT_ANCHOR.to_string(),
        }
    }
}

/// Device node queries over a borrowed gateway
pub struct DeviceNodeEnumerator<'a, G> {
    gateway: &'a G,
    search: &'a NodeSearch,
}

impl<'a, G: CommandGateway> DeviceNodeEnumerator<'a, G> {
    pub fn new(gateway: &'a G, search: &'a NodeSearch) -> Self {
        Self { gateway, search }
    }

    /// `find <dev_dir> -type <c|b> -name <pattern>`; empty on failure
    pub async fn find_dev_nodes(&self, pattern: &str, kind: NodeKind) -> Vec<String> {
        let out = self
            .gateway
            .execute(
                &["find", self.search.dev_dir.as_str(), "-type", kind.find_type(), "-name", pattern],
                None,
            )
            .await;

        if !out.success() || out.output.trim().is_empty() {
            return Vec::new();
        }
        out.output
            .trim()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()
    }

    /// Controller char nodes, one per PCIe function
    pub async fn controller_nodes(&self) -> Vec<String> {
        let mut nodes = self.find_dev_nodes(&self.search.pattern, NodeKind::Char).await;
        nodes.retain(|node| {
            let keep = is_controller_node(node);
            if !keep {
                debug!("Skipping non-controller char node {}", node);
            }
            keep
        });
        nodes
    }

    /// Namespace block nodes with partitions removed
    pub async fn namespace_nodes(&self) -> Vec<String> {
        let mut nodes = self.find_dev_nodes(&self.search.pattern, NodeKind::Block).await;
        nodes.retain(|node| !is_partition_node(node));
        nodes
    }

    /// `udevadm info -q path -n <node>`
    ///
    /// `Ok(None)` when udev cannot resolve the node; `Err` when the path it
    /// returns cannot be parsed.
    pub async fn path_by_name(&self, node: &str) -> Result<Option<BusPath>, PathError> {
        let out = self
            .gateway
            .execute(&["udevadm", "info", "-q", "path", "-n", node], None)
            .await;
        if !out.success() {
            return Ok(None);
        }
        BusPath::from_name_path(out.output.trim(), &self.search.anchor).map(Some)
    }

    /// Bus path of a namespace block node
    ///
    /// A multipath head resolves to a virtual subsystem path; its bus chain
    /// is taken from the controller instance named in the node.
    pub async fn namespace_path(&self, node: &str) -> Result<Option<BusPath>, PathError> {
        let out = self
            .gateway
            .execute(&["udevadm", "info", "-q", "path", "-n", node], None)
            .await;
        if !out.success() {
            return Ok(None);
        }
        let raw = out.output.trim();
        if !is_virtual_path(raw) {
            return BusPath::from_name_path(raw, &self.search.anchor).map(Some);
        }
        let Some(ctrl) = controller_of_namespace(node) else {
            debug!("No controller instance in virtual namespace {}", node);
            return Ok(None);
        };
        debug!("{} is a multipath head, using {}", node, ctrl);
        let ctrl_node = format!("{}/{}", self.search.dev_dir.trim_end_matches('/'), ctrl);
        self.path_by_name(&ctrl_node).await
    }

    /// `udevadm info -q path -p /sys/bus/pci/devices/<bdf>`
    pub async fn path_by_bdf(&self, bdf: &str) -> Result<Option<BusPath>, PathError> {
        let sys_path = format!("/sys/bus/pci/devices/{}", bdf);
        let out = self
            .gateway
            .execute(&["udevadm", "info", "-q", "path", "-p", sys_path.as_str()], None)
            .await;
        if !out.success() {
            return Ok(None);
        }
        BusPath::from_bdf_path(out.output.trim()).map(Some)
    }

    /// `lspci -D` as `bdf -> description`; `None` when lspci fails
    pub async fn bus_inventory(&self, filter: Option<&str>) -> Option<BTreeMap<String, String>> {
        let out = self.gateway.execute(&["lspci", "-D"], None).await;
        if !out.success() {
            return None;
        }
        Some(parse_bus_inventory(&out.output, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LSPCI: &str = "\
0000:00:00.0 Host bridge: Intel Corporation 8th Gen Core Processor Host Bridge/DRAM Registers (rev 07)
0000:00:1c.4 PCI bridge: Intel Corporation Cannon Lake PCH PCI Express Root Port #5 (rev f0)
0000:04:00.0 Non-Volatile memory controller: Samsung Electronics Co Ltd NVMe SSD Controller SM981/PM981/PM983
0000:05:00.0 Non-Volatile memory controller: Intel Corporation SSD 660P Series (rev 03)
";

    #[test]
    fn test_partition_filter() {
        let nodes = ["nvme0n1", "nvme0n1p1", "nvme1n1"];
        let kept: Vec<&str> = nodes.iter().copied().filter(|n| !is_partition_node(n)).collect();
        assert_eq!(kept, ["nvme0n1", "nvme1n1"]);
        assert!(is_partition_node("/dev/nvme12n3p14"));
        assert!(!is_partition_node("/dev/nvme12n3"));
    }

    #[test]
    fn test_controller_node_names() {
        assert!(is_controller_node("/dev/nvme0"));
        assert!(is_controller_node("nvme17"));
        assert!(!is_controller_node("/dev/nvme-fabrics"));
        assert!(!is_controller_node("/dev/nvme0n1"));
        assert!(!is_controller_node("/dev/nvme"));
    }

    #[test]
    fn test_controller_of_namespace() {
        assert_eq!(controller_of_namespace("/dev/nvme0n1").as_deref(), Some("nvme0"));
        assert_eq!(controller_of_namespace("nvme12n3").as_deref(), Some("nvme12"));
        assert_eq!(controller_of_namespace("/dev/nvme0"), None);
        assert_eq!(controller_of_namespace("/dev/nvme-fabrics"), None);
        assert_eq!(controller_of_namespace("nvmen1"), None);
    }

    #[test]
    fn test_virtual_paths() {
        assert!(is_virtual_path("/devices/virtual/nvme-subsystem/nvme-subsys0/nvme0n1"));
        assert!(!is_virtual_path("/devices/pci0000:00/0000:01:00.0/nvme/nvme0/nvme0n1"));
    }

    #[test]
    fn test_node_name() {
        assert_eq!(node_name("/dev/nvme0n1"), "nvme0n1");
        assert_eq!(node_name("nvme0"), "nvme0");
    }

    #[test]
    fn test_bus_inventory_filtering() {
        let all = parse_bus_inventory(LSPCI, None);
        assert_eq!(all.len(), 4);
        assert_eq!(parse_bus_inventory(LSPCI, Some("")), all);

        let ssds = parse_bus_inventory(LSPCI, Some(DEFAULT_BUS_FILTER));
        assert_eq!(ssds.len(), 2);
        assert_eq!(ssds, parse_bus_inventory(LSPCI, Some("Non-Volatile")));
        assert!(ssds["0000:05:00.0"].starts_with("Non-Volatile memory controller: Intel"));

        assert!(parse_bus_inventory(LSPCI, Some("no-such-dev_filter")).is_empty());
    }
}
