//! PCIe topology chains parsed from udev device paths
//!
//! `udevadm info -q path` returns sysfs-style paths such as
//! `/devices/pci0000:00/0000:00:1c.4/0000:04:00.0/nvme/nvme0`.
//! The first two segments (empty + `devices`) are dropped; what remains is
//! the bus chain from root complex to endpoint.
//!
//! Querying by bus address yields a path that ends at the endpoint.
//! Querying by node name appends driver segments (`nvme/nvme0`,
//! `nvme/nvme0/nvme0n1`, depending on kernel version) that must be cut off
//! at the subsystem anchor.

use crate::error::PathError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Subsystem segment that ends the bus chain in by-name paths
pub const DEFAULT_ANCHOR: &str = "nvme";

/// Ordered bus addresses, root complex first, endpoint last
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BusPathData")]
pub struct BusPath {
    udev_path: String,
    chain: Vec<String>,
}

/// Stored form, validated before it becomes a `BusPath`
#[derive(Deserialize)]
struct BusPathData {
    udev_path: String,
    chain: Vec<String>,
}

impl TryFrom<BusPathData> for BusPath {
    type Error = PathError;

    fn try_from(data: BusPathData) -> Result<Self, PathError> {
        Self::build(&data.udev_path, data.chain)
    }
}

impl BusPath {
    /// Parse a path; `anchor` selects the by-name form
    pub fn parse(path: &str, anchor: Option<&str>) -> Result<Self, PathError> {
        match anchor {
            Some(anchor) => Self::from_name_path(path, anchor),
            None => Self::from_bdf_path(path),
        }
    }

    /// Path returned for `/sys/bus/pci/devices/<bdf>`: every segment after
    /// the prefix is a bus address
    pub fn from_bdf_path(path: &str) -> Result<Self, PathError> {
        let segments = split_segments(path)?;
        let chain: Vec<String> = segments[2..].iter().map(|s| s.to_string()).collect();
        Self::build(path, chain)
    }

    /// Path returned for a device node: the chain stops before `anchor`
    pub fn from_name_path(path: &str, anchor: &str) -> Result<Self, PathError> {
        let segments = split_segments(path)?;
        let end = segments
            .iter()
            .skip(2)
            .position(|s| *s == anchor)
            .map(|pos| pos + 2)
            .ok_or_else(|| PathError::AnchorNotFound {
                path: path.to_string(),
                anchor: anchor.to_string(),
            })?;

        let chain: Vec<String> = segments[2..end].iter().map(|s| s.to_string()).collect();
        if chain.len() < 2 {
            return Err(PathError::ChainTooShort {
                path: path.to_string(),
            });
        }
        Self::build(path, chain)
    }

    fn build(path: &str, chain: Vec<String>) -> Result<Self, PathError> {
        if chain.is_empty() {
            return Err(PathError::NoBusAddress {
                path: path.to_string(),
            });
        }
        if chain.iter().any(|s| s.is_empty()) {
            return Err(PathError::EmptySegment {
                path: path.to_string(),
            });
        }
        Ok(Self {
            udev_path: path.to_string(),
            chain,
        })
    }

    /// Bus address of the device itself
    pub fn endpoint(&self) -> &str {
        // build() guarantees a non-empty chain
        &self.chain[self.chain.len() - 1]
    }

    pub fn bdf(&self) -> &str {
        self.endpoint()
    }

    /// Parent of the endpoint (typically the port used for resets); the
    /// root itself when the endpoint hangs directly off the root complex
    pub fn upstream(&self) -> &str {
        if self.chain.len() >= 2 {
            &self.chain[self.chain.len() - 2]
        } else {
            self.root()
        }
    }

    /// Top of the hierarchy
    pub fn root(&self) -> &str {
        &self.chain[0]
    }

    /// Character length of the slash-joined chain
    pub fn length(&self) -> usize {
        self.to_string().len()
    }

    /// Number of bus addresses in the chain
    pub fn count(&self) -> usize {
        self.chain.len()
    }

    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    pub fn udev_path(&self) -> &str {
        &self.udev_path
    }

    /// Endpoint first, for human consumption
    pub fn iter_from_endpoint(&self) -> impl Iterator<Item = &str> {
        self.chain.iter().rev().map(String::as_str)
    }
}

impl fmt::Display for BusPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.chain.join("/"))
    }
}

fn split_segments(path: &str) -> Result<Vec<&str>, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() < 3 {
        return Err(PathError::TooFewSegments {
            path: path.to_string(),
            segments: segments.len(),
        });
    }
    Ok(segments)
}
