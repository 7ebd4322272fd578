//! # Placement
//!
//! Where a blob lives: a device tag, a list of device names and an optional device mesh
//! ("hierarchy").
//!
//! Placement travels in two shapes. Op-attribute lookups hand back the plain, field-for-field
//! [`ParallelConf`]; the runtime only accepts the structured [`CfgParallelConf`]. Resolution
//! converts one into the other through [`AnyParallelConf::into_cfg`], and the conversion is
//! lossless in both directions.
//!
//! ## Device names
//!
//! | Form | Meaning |
//! |------|---------|
//! | `"0:3"` | node 0, device 3 |
//! | `"0:0-3"` | node 0, devices 0 through 3 (one process per device) |
//! | `"@1:0-3"` | process rank 1, devices 0 through 3 |
//!
//! [`ParallelDesc`] expands those names into device and process counts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod conf;
pub mod parallel_desc;
mod text;

pub use conf::{AnyParallelConf, CfgParallelConf, CfgShape, ParallelConf, ShapeProto};
pub use parallel_desc::{ParallelDesc, ProcessCtx};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlacementError {
    #[error("Unknown device tag: {0}")]
    UnknownDeviceTag(String),
    #[error("Invalid device name: {0}")]
    InvalidDeviceName(String),
    #[error("Placement lists no devices")]
    NoDevices,
    /// A hierarchy with no dims or a dim that is not positive.
    #[error("Invalid hierarchy: {0:?}")]
    InvalidHierarchy(Vec<i64>),
    #[error("Hierarchy {hierarchy:?} does not cover {parallel_num} devices")]
    HierarchyMismatch {
        hierarchy: Vec<i64>,
        parallel_num: usize,
    },
    /// Malformed text-form placement.
    #[error("Parse error at byte {offset}: {msg}")]
    Parse { offset: usize, msg: String },
}

pub type Result<T> = std::result::Result<T, PlacementError>;

/// Kind of device a placement targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceTag {
    Cpu,
    Gpu,
}

impl DeviceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceTag::Cpu => "cpu",
            DeviceTag::Gpu => "gpu",
        }
    }
}

impl fmt::Display for DeviceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceTag {
    type Err = PlacementError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(DeviceTag::Cpu),
            "gpu" | "cuda" => Ok(DeviceTag::Gpu),
            other => Err(PlacementError::UnknownDeviceTag(other.to_string())),
        }
    }
}
