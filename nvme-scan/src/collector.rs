//! Topology correlator
//!
//! Stitches three independent identity spaces into one snapshot:
//! - PCIe bus addresses (udev paths)
//! - kernel device nodes (`/dev/nvmeX`, `/dev/nvmeXnY`)
//! - NVMe controller / namespace IDs (nvme-cli)
//!
//! Commands are issued one at a time. A device that fails a query is
//! recorded with absent data; only an unparsable udev path aborts a scan.

use crate::diff::ChangeSet;
use crate::error::{Result, ScanError};
use crate::gateway::CommandGateway;
use crate::identify::IdentifyQuery;
use crate::logging::SharedLogger;
use crate::model::{ControllerRecord, NamespaceEntry, NamespaceRecord, TopologySnapshot};
use crate::nodes::{node_name, DeviceNodeEnumerator, NodeSearch};
use tracing::{debug, info, Level};

/// Which part of the device population a scan records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScanScope {
    #[default]
    All,
    /// One controller by bus address (case-insensitive)
    Bdf(String),
    /// One controller by node, `/dev/nvme0` or `nvme0`
    Node(String),
}

impl ScanScope {
    fn includes(&self, node: &str, bdf: &str) -> bool {
        match self {
            ScanScope::All => true,
            ScanScope::Bdf(target) => target.eq_ignore_ascii_case(bdf),
            ScanScope::Node(target) => node_name(target) == node_name(node),
        }
    }
}

/// Builds topology snapshots and keeps the latest one
pub struct Collector<G> {
    gateway: G,
    logger: SharedLogger,
    search: NodeSearch,
    scope: ScanScope,
    current: Option<TopologySnapshot>,
}

impl<G: CommandGateway> Collector<G> {
    pub fn new(gateway: G, logger: SharedLogger) -> Self {
        Self {
            gateway,
            logger,
            search: NodeSearch::default(),
            scope: ScanScope::default(),
            current: None,
        }
    }

    pub fn with_search(mut self, search: NodeSearch) -> Self {
        self.search = search;
        self
    }

    pub fn with_scope(mut self, scope: ScanScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Snapshot retained from the last successful scan
    pub fn current(&self) -> Option<&TopologySnapshot> {
        self.current.as_ref()
    }

    /// Full discovery pass; the result becomes the current state
    pub async fn scan(&mut self) -> Result<TopologySnapshot> {
        let snapshot = self.collect().await?;
        self.current = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Re-scan and compare against the retained snapshot
    pub async fn rescan(&mut self) -> Result<ChangeSet> {
        let previous = self.current.clone().ok_or(ScanError::NoSnapshot)?;
        self.diff_against(&previous).await
    }

    /// Re-scan and compare against a supplied baseline (e.g. a data file)
    ///
    /// A scoped collector only compares the part of the baseline its scope
    /// covers; devices outside the scope are neither removed nor changed.
    pub async fn diff_against(&mut self, previous: &TopologySnapshot) -> Result<ChangeSet> {
        let fresh = self.scan().await?;
        if self.scope == ScanScope::All {
            return Ok(ChangeSet::between(previous, &fresh));
        }
        let scoped = previous.restricted_to(|c| self.scope.includes(&c.node, c.bdf()));
        debug!(
            "Baseline narrowed to {} of {} controllers for {:?}",
            scoped.controllers().len(),
            previous.controllers().len(),
            self.scope
        );
        Ok(ChangeSet::between(&scoped, &fresh))
    }

    async fn collect(&self) -> Result<TopologySnapshot> {
        let host = self.gateway.host_label();
        info!("Starting NVMe topology scan on {} (scope: {:?})", host, self.scope);

        let nodes = DeviceNodeEnumerator::new(&self.gateway, &self.search);
        let query = IdentifyQuery::new(&self.gateway, &self.logger);

        let ctrl_nodes = nodes.controller_nodes().await;
        let ns_nodes = nodes.namespace_nodes().await;
        debug!("Found {} controller nodes, {} namespace nodes", ctrl_nodes.len(), ns_nodes.len());

        // Namespaces first: (device path, record)
        let mut namespaces: Vec<(String, NamespaceRecord)> = Vec::new();
        for dev in &ns_nodes {
            let Some(path) = nodes.namespace_path(dev).await? else {
                self.logger.log(Level::WARN, &format!("cannot resolve PCIe path of {}", dev));
                continue;
            };
            debug!("Namespace {} at {}", dev, path);
            namespaces.push((dev.clone(), NamespaceRecord::discovered(node_name(dev), path)));
        }

        let mut controllers: Vec<ControllerRecord> = Vec::new();
        for dev in &ctrl_nodes {
            let Some(path) = nodes.path_by_name(dev).await? else {
                self.logger.log(Level::WARN, &format!("cannot resolve PCIe path of {}", dev));
                continue;
            };
            if !self.scope.includes(dev, path.bdf()) {
                debug!("Controller {} at {} outside scan scope", dev, path.bdf());
                continue;
            }
            if controllers.iter().any(|c| c.bdf() == path.bdf()) {
                self.logger.log(
                    Level::WARN,
                    &format!("{} duplicates bus address {}, skipped", dev, path.bdf()),
                );
                continue;
            }

            let ns_ids = query.namespace_ids(dev).await;
            let identify = query.controller_identify(dev).await;
            if identify.is_none() {
                debug!("No identify data for {}", dev);
            }
            let controller_ids = query
                .controller_ids(dev)
                .await
                .into_iter()
                .map(|c| c.cntlid)
                .collect();

            let mut entries = Vec::with_capacity(ns_ids.len());
            for id in ns_ids {
                entries.push(NamespaceEntry {
                    nsid: id.nsid,
                    index: id.index,
                    identify: query.namespace_identify_by_id(dev, id.nsid).await,
                });
            }

            info!(
                "Controller {} at {} with {} namespace(s)",
                node_name(dev),
                path.bdf(),
                entries.len()
            );
            controllers.push(ControllerRecord {
                node: node_name(dev).to_string(),
                cntlid: identify.as_ref().map(|id| id.cntlid),
                path,
                identify,
                namespaces: entries,
                controller_ids,
            });
        }

        if self.scope != ScanScope::All {
            namespaces.retain(|(_, ns)| controllers.iter().any(|c| c.bdf() == ns.bdf()));
        }

        for (dev, ns) in namespaces.iter_mut() {
            let Some(ctrl) = controllers.iter().find(|c| c.bdf() == ns.bdf()) else {
                self.logger.log(
                    Level::WARN,
                    &format!("namespace {} has no controller at {}", ns.node, ns.bdf()),
                );
                continue;
            };
            let Some(nsid) = query.namespace_id(dev.as_str()).await else {
                continue;
            };
            match ctrl.namespace(nsid) {
                Some(entry) => {
                    let identify = match &entry.identify {
                        Some(id) => Some(id.clone()),
                        None => query.namespace_identify(dev.as_str()).await,
                    };
                    ns.identify(nsid, identify);
                }
                None => self.logger.log(
                    Level::WARN,
                    &format!("namespace {} (nsid {}) not listed by {}", ns.node, nsid, ctrl.node),
                ),
            }
        }

        let namespaces: Vec<NamespaceRecord> = namespaces.into_iter().map(|(_, ns)| ns).collect();
        info!(
            "Scan complete - {} controller(s), {} namespace(s)",
            controllers.len(),
            namespaces.len()
        );
        Ok(TopologySnapshot::new(host, controllers, namespaces))
    }
}
