/*!
Declarative fake hosts

A `FixtureHost` describes controllers, namespaces and bridges, then
renders the `find`, `udevadm`, `lspci` and `nvme` output a real host with
that topology would print, as a `ScriptedGateway` script.
*/

use crate::gateway_stub::ScriptedGateway;
use serde_json::json;

const ROOT_COMPLEX: &str = "pci0000:00";
const DEFAULT_BRIDGE: &str = "0000:00:1c.0";

#[derive(Debug, Clone)]
pub struct FixtureNamespace {
    pub nsid: u32,
    pub block: String,
    pub nsze: u64,
    pub ncap: u64,
    pub partitions: u32,
    /// Block node exists under /dev
    pub visible: bool,
}

#[derive(Debug, Clone)]
pub struct FixtureController {
    pub bdf: String,
    pub bridges: Vec<String>,
    pub node: String,
    pub cntlid: u16,
    pub serial: String,
    pub model: String,
    pub firmware: String,
    pub namespaces: Vec<FixtureNamespace>,
    pub identify: bool,
    pub namespace_identify: bool,
    pub controller_list: Option<Vec<u16>>,
}

impl FixtureController {
    pub fn new(bdf: &str, node: &str) -> Self {
        Self {
            bdf: bdf.to_string(),
            bridges: vec![DEFAULT_BRIDGE.to_string()],
            node: node.to_string(),
            cntlid: 1,
            serial: format!("FX-{}", node.to_uppercase()),
            model: "Fixture NVMe SSD".to_string(),
            firmware: "1.0".to_string(),
            namespaces: Vec::new(),
            identify: true,
            namespace_identify: true,
            controller_list: None,
        }
    }

    /// Bridges between the root complex and the endpoint, root side first
    pub fn bridges(mut self, bdfs: &[&str]) -> Self {
        self.bridges = bdfs.iter().map(|b| b.to_string()).collect();
        self
    }

    pub fn cntlid(mut self, cntlid: u16) -> Self {
        self.cntlid = cntlid;
        self
    }

    pub fn serial(mut self, serial: &str) -> Self {
        self.serial = serial.to_string();
        self
    }

    pub fn model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn firmware(mut self, firmware: &str) -> Self {
        self.firmware = firmware.to_string();
        self
    }

    /// Namespace with block node `<node>n<nsid>`
    pub fn namespace(self, nsid: u32) -> Self {
        self.namespace_with_partitions(nsid, 0)
    }

    pub fn namespace_with_partitions(mut self, nsid: u32, partitions: u32) -> Self {
        let size = 0x0100_0000 * u64::from(nsid);
        self.namespaces.push(FixtureNamespace {
            nsid,
            block: format!("{}n{}", self.node, nsid),
            nsze: size,
            ncap: size,
            partitions,
            visible: true,
        });
        self
    }

    /// Listed by the controller but without a block node
    pub fn hidden_namespace(mut self, nsid: u32) -> Self {
        self = self.namespace(nsid);
        if let Some(ns) = self.namespaces.last_mut() {
            ns.visible = false;
        }
        self
    }

    /// `nvme id-ctrl` fails on this controller
    pub fn without_identify(mut self) -> Self {
        self.identify = false;
        self
    }

    /// `nvme id-ns` fails for every namespace of this controller
    pub fn without_namespace_identify(mut self) -> Self {
        self.namespace_identify = false;
        self
    }

    /// `nvme list-ctrl` is supported and returns `ids`
    pub fn controller_list(mut self, ids: &[u16]) -> Self {
        self.controller_list = Some(ids.to_vec());
        self
    }

    /// sysfs path of the PCIe function
    pub fn udev_base(&self) -> String {
        let mut segments = vec!["", "devices", ROOT_COMPLEX];
        segments.extend(self.bridges.iter().map(String::as_str));
        segments.push(&self.bdf);
        segments.join("/")
    }

    fn dev(&self) -> String {
        format!("/dev/{}", self.node)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FixtureHost {
    pub host: String,
    pub controllers: Vec<FixtureController>,
    extra_char_nodes: Vec<String>,
    orphan_namespaces: Vec<(String, String)>,
    udev_overrides: Vec<(String, String)>,
    lspci_available: bool,
}

impl FixtureHost {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            lspci_available: true,
            ..Default::default()
        }
    }

    pub fn controller(mut self, controller: FixtureController) -> Self {
        self.controllers.push(controller);
        self
    }

    /// Extra char node matching `nvme*`, e.g. `/dev/nvme-fabrics`
    pub fn char_node(mut self, path: &str) -> Self {
        self.extra_char_nodes.push(path.to_string());
        self
    }

    /// Block node whose PCIe function has no controller char node
    pub fn orphan_namespace(mut self, block: &str, bdf: &str) -> Self {
        self.orphan_namespaces.push((block.to_string(), bdf.to_string()));
        self
    }

    /// Replace what udev reports for `/dev/<node>`
    pub fn udev_path(mut self, node: &str, path: &str) -> Self {
        self.udev_overrides.push((node.to_string(), path.to_string()));
        self
    }

    pub fn without_lspci(mut self) -> Self {
        self.lspci_available = false;
        self
    }

    pub fn render(&self) -> ScriptedGateway {
        let gateway = ScriptedGateway::new(self.host.clone());
        self.apply(&gateway);
        gateway
    }

    /// Replace the script of an existing gateway with this host's output
    pub fn apply(&self, gateway: &ScriptedGateway) {
        gateway.clear_script();

        let mut char_nodes: Vec<String> = self.controllers.iter().map(|c| c.dev()).collect();
        char_nodes.extend(self.extra_char_nodes.iter().cloned());
        gateway.on_ok("find /dev -type c -name nvme*", lines(&char_nodes));

        let mut block_nodes = Vec::new();
        for ctrl in &self.controllers {
            for ns in ctrl.namespaces.iter().filter(|ns| ns.visible) {
                block_nodes.push(format!("/dev/{}", ns.block));
                block_nodes.extend((1..=ns.partitions).map(|p| format!("/dev/{}p{}", ns.block, p)));
            }
        }
        block_nodes.extend(self.orphan_namespaces.iter().map(|(block, _)| format!("/dev/{}", block)));
        gateway.on_ok("find /dev -type b -name nvme*", lines(&block_nodes));

        for ctrl in &self.controllers {
            self.render_controller(gateway, ctrl);
        }

        for (block, bdf) in &self.orphan_namespaces {
            let path = format!(
                "/devices/{}/{}/{}/nvme/nvme99/{}",
                ROOT_COMPLEX, DEFAULT_BRIDGE, bdf, block
            );
            gateway.on_ok(format!("udevadm info -q path -n /dev/{}", block), path);
        }

        for (node, path) in &self.udev_overrides {
            gateway.on_ok(format!("udevadm info -q path -n /dev/{}", node), path.clone());
        }

        if self.lspci_available {
            gateway.on_ok("lspci -D", self.lspci());
        }
    }

    fn render_controller(&self, gateway: &ScriptedGateway, ctrl: &FixtureController) {
        let dev = ctrl.dev();
        let base = ctrl.udev_base();

        gateway.on_ok(
            format!("udevadm info -q path -n {}", dev),
            format!("{}/nvme/{}", base, ctrl.node),
        );
        gateway.on_ok(
            format!("udevadm info -q path -p /sys/bus/pci/devices/{}", ctrl.bdf),
            base.clone(),
        );

        let listing: Vec<String> = ctrl
            .namespaces
            .iter()
            .enumerate()
            .map(|(i, ns)| format!("[{:>4}]:{:#x}", i, ns.nsid))
            .collect();
        gateway.on_ok(format!("nvme list-ns {}", dev), lines(&listing));

        if ctrl.identify {
            let payload = json!({
                "vid": 0x1b36,
                "ssvid": 0x1af4,
                "sn": format!("{:<20}", ctrl.serial),
                "mn": format!("{:<40}", ctrl.model),
                "fr": format!("{:<8}", ctrl.firmware),
                "cntlid": ctrl.cntlid,
                "ver": 0x10400,
                "nn": ctrl.namespaces.len(),
            });
            gateway.on_ok(format!("nvme id-ctrl {} -o json", dev), payload.to_string());
        }

        if let Some(ids) = &ctrl.controller_list {
            let listing: Vec<String> = ids
                .iter()
                .enumerate()
                .map(|(i, id)| format!("[{:>4}]:{:#x}", i, id))
                .collect();
            gateway.on_ok(format!("nvme list-ctrl {}", dev), lines(&listing));
        }

        for ns in &ctrl.namespaces {
            if ctrl.namespace_identify {
                let payload = json!({
                    "nsze": ns.nsze,
                    "ncap": ns.ncap,
                    "nuse": ns.nsze / 2,
                    "nlbaf": 0,
                    "flbas": 0,
                })
                .to_string();
                gateway.on_ok(format!("nvme id-ns {} -n {} -o json", dev, ns.nsid), payload.clone());
                if ns.visible {
                    gateway.on_ok(format!("nvme id-ns /dev/{} -o json", ns.block), payload);
                }
            }
            if ns.visible {
                let block = format!("/dev/{}", ns.block);
                gateway.on_ok(
                    format!("udevadm info -q path -n {}", block),
                    format!("{}/nvme/{}/{}", base, ctrl.node, ns.block),
                );
                gateway.on_ok(
                    format!("nvme get-ns-id {}", block),
                    format!("{}: namespace-id:{}", block, ns.nsid),
                );
            }
        }
    }

    fn lspci(&self) -> String {
        let mut out = vec![
            "0000:00:00.0 Host bridge: Fixture Corp Host Bridge/DRAM Registers (rev 07)".to_string(),
        ];
        let mut bridges: Vec<&str> = self
            .controllers
            .iter()
            .flat_map(|c| c.bridges.iter().map(String::as_str))
            .collect();
        bridges.sort_unstable();
        bridges.dedup();
        out.extend(
            bridges
                .into_iter()
                .map(|b| format!("{} PCI bridge: Fixture Corp PCI Express Root Port (rev f0)", b)),
        );
        out.extend(
            self.controllers
                .iter()
                .map(|c| format!("{} Non-Volatile memory controller: {}", c.bdf, c.model)),
        );
        lines(&out)
    }
}

fn lines(items: &[String]) -> String {
    let mut text = items.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    text
}
