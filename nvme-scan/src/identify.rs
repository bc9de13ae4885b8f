//! nvme-cli queries: namespace/controller listings and identify payloads
//!
//! Not every drive answers every query. Failures degrade to empty lists or
//! `None`; unsupported listings are logged at info level.

use crate::gateway::CommandGateway;
use crate::logging::SharedLogger;
use crate::model::{ControllerIdentify, NamespaceIdentify};
use serde::de::DeserializeOwned;
use tracing::Level;

/// One `[index]:0xID` line of `nvme list-ns`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceId {
    pub index: u32,
    pub nsid: u32,
}

/// One `[index]:0xID` line of `nvme list-ctrl`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerId {
    pub index: u32,
    pub cntlid: u16,
}

/// Parse a single `[   0]:0x1` line into `(index, id)`
pub fn parse_id_line(line: &str) -> Option<(u32, u32)> {
    let (index, id) = line.trim().strip_prefix('[')?.split_once("]:")?;
    let index = index.trim().parse().ok()?;
    let id = id.trim();
    let hex = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .unwrap_or(id);
    let id = u32::from_str_radix(hex, 16).ok()?;
    Some((index, id))
}

/// Parse every id line, returning the entries and the lines rejected
pub fn parse_id_list(text: &str) -> (Vec<(u32, u32)>, Vec<String>) {
    let mut ids = Vec::new();
    let mut rejected = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        match parse_id_line(line) {
            Some(entry) => ids.push(entry),
            None => rejected.push(line.to_string()),
        }
    }
    (ids, rejected)
}

/// Parse `nvme get-ns-id` output: `/dev/nvme0n1: namespace-id:1`
pub fn parse_ns_id(text: &str) -> Option<u32> {
    let (_, id) = text.trim().rsplit_once("namespace-id:")?;
    id.trim().parse().ok()
}

/// Identify and listing queries over a borrowed gateway
pub struct IdentifyQuery<'a, G> {
    gateway: &'a G,
    logger: &'a SharedLogger,
}

impl<'a, G: CommandGateway> IdentifyQuery<'a, G> {
    pub fn new(gateway: &'a G, logger: &'a SharedLogger) -> Self {
        Self { gateway, logger }
    }

    /// `nvme list-ns <ctrl>`; empty when the listing fails
    pub async fn namespace_ids(&self, ctrl_node: &str) -> Vec<NamespaceId> {
        let out = self.gateway.execute(&["nvme", "list-ns", ctrl_node], None).await;
        if !out.success() {
            return Vec::new();
        }
        self.id_list(ctrl_node, &out.output)
            .into_iter()
            .map(|(index, nsid)| NamespaceId { index, nsid })
            .collect()
    }

    /// `nvme list-ctrl <ctrl>`; many drives do not support it
    pub async fn controller_ids(&self, ctrl_node: &str) -> Vec<ControllerId> {
        let out = self.gateway.execute(&["nvme", "list-ctrl", ctrl_node], None).await;
        if !out.success() {
            self.logger.log(
                Level::INFO,
                &format!("controller listing not supported by {}", ctrl_node),
            );
            return Vec::new();
        }
        self.id_list(ctrl_node, &out.output)
            .into_iter()
            .filter_map(|(index, id)| {
                u16::try_from(id).ok().map(|cntlid| ControllerId { index, cntlid })
            })
            .collect()
    }

    /// `nvme id-ctrl <ctrl> -o json`
    pub async fn controller_identify(&self, ctrl_node: &str) -> Option<ControllerIdentify> {
        self.json_query(&["nvme", "id-ctrl", ctrl_node, "-o", "json"]).await
    }

    /// `nvme id-ns <block-node> -o json`
    pub async fn namespace_identify(&self, ns_node: &str) -> Option<NamespaceIdentify> {
        self.json_query(&["nvme", "id-ns", ns_node, "-o", "json"]).await
    }

    /// `nvme id-ns <ctrl> -n <nsid> -o json`
    pub async fn namespace_identify_by_id(
        &self,
        ctrl_node: &str,
        nsid: u32,
    ) -> Option<NamespaceIdentify> {
        let nsid = nsid.to_string();
        self.json_query(&["nvme", "id-ns", ctrl_node, "-n", nsid.as_str(), "-o", "json"])
            .await
    }

    /// `nvme get-ns-id <block-node>`
    pub async fn namespace_id(&self, ns_node: &str) -> Option<u32> {
        let out = self.gateway.execute(&["nvme", "get-ns-id", ns_node], None).await;
        if !out.success() {
            self.logger.log(
                Level::INFO,
                &format!("namespace id not available for {}", ns_node),
            );
            return None;
        }
        parse_ns_id(&out.output)
    }

    fn id_list(&self, node: &str, text: &str) -> Vec<(u32, u32)> {
        let (ids, rejected) = parse_id_list(text);
        for line in rejected {
            self.logger.log(
                Level::WARN,
                &format!("ignoring malformed id line from {}: {:?}", node, line),
            );
        }
        ids
    }

    async fn json_query<T: DeserializeOwned>(&self, tokens: &[&str]) -> Option<T> {
        let out = self.gateway.execute(tokens, None).await;
        if !out.success() {
            return None;
        }
        match serde_json::from_str(&out.output) {
            Ok(payload) => Some(payload),
            Err(e) => {
                self.logger.log(
                    Level::ERROR,
                    &format!("unparsable output from {}: {}", tokens.join(" "), e),
                );
                None
            }
        }
    }
}
