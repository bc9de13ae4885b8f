//! NVMe device topology discovery
//!
//! Correlates three identity spaces of every NVMe device on a host:
//! - PCIe bus addresses and their upstream bridge chain (udev)
//! - kernel device nodes (`/dev/nvmeX`, `/dev/nvmeXnY`)
//! - NVMe controller and namespace identifiers (nvme-cli)
//!
//! All data comes from external tools run through a `CommandGateway`,
//! either on this host or on a remote one over a shell session.

pub mod collector;
pub mod config;
pub mod diff;
pub mod error;
pub mod gateway;
pub mod identify;
pub mod logging;
pub mod model;
pub mod nodes;
pub mod options;
pub mod pcie;
pub mod store;

pub use collector::{Collector, ScanScope};
pub use config::{RemoteConfig, ScanConfig, ScanSettings};
pub use diff::{ChangeSet, DeviceChange, FieldChange};
pub use error::{PathError, Result, ScanError};
pub use gateway::{CommandGateway, CommandOutput, LocalGateway, RemoteGateway, RemoteLogin};
pub use logging::{ScanLogger, SharedLogger, TracingLogger};
pub use model::{ControllerRecord, NamespaceRecord, TopologySnapshot};
pub use options::{Cli, ScanOptions};
pub use pcie::BusPath;
