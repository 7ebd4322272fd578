//! Configuration.
//!
//! Sessions are configured from JSON ([`SessionConfig`]). Distributed topology comes from
//! the launcher's environment variables ([`DistributedEnv`]).
//!
//! ```rust
//! use oneflow_eager::config::SessionConfig;
//! use oneflow_eager::runtime::RuntimeMode;
//!
//! let config = SessionConfig::from_json_str(r#"{
//!     "mode": "normal",
//!     "interface_ops": [{
//!         "job_name": "train",
//!         "op_attribute": { "op_name": "Input_0", "output_bns": ["out"] },
//!         "parallel_conf": { "device_tag": "cpu", "device_name": ["0:0"] }
//!     }]
//! }"#).unwrap();
//! assert_eq!(config.mode, RuntimeMode::Normal);
//! assert_eq!(config.interface_ops.len(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::op_attr::InterfaceOpDecl;
use crate::runtime::RuntimeMode;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub mode: RuntimeMode,
    #[serde(default)]
    pub interface_ops: Vec<InterfaceOpDecl>,
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading session config");
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Rank layout of the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedEnv {
    pub rank: usize,
    pub local_rank: usize,
    pub world_size: usize,
}

impl DistributedEnv {
    /// A lone process: rank 0 of 1.
    pub fn single() -> Self {
        Self {
            rank: 0,
            local_rank: 0,
            world_size: 1,
        }
    }

    /// Reads `RANK`, `LOCAL_RANK` and `WORLD_SIZE`.
    ///
    /// Unset variables fall back to [`DistributedEnv::single`]'s values.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`DistributedEnv::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |key: &str, default: usize| -> Result<usize> {
            match lookup(key) {
                None => Ok(default),
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| Error::Config(format!("{key}={raw:?} is not a number"))),
            }
        };
        let env = Self {
            rank: read("RANK", 0)?,
            local_rank: read("LOCAL_RANK", 0)?,
            world_size: read("WORLD_SIZE", 1)?,
        };
        if env.world_size == 0 || env.rank >= env.world_size {
            return Err(Error::Config(format!(
                "rank {} is outside a world of size {}",
                env.rank, env.world_size
            )));
        }
        Ok(env)
    }
}

impl Default for DistributedEnv {
    fn default() -> Self {
        Self::single()
    }
}
