//! The two placement representations and the translation between them.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{PlacementError, text};

/// Plain wire-form shape: a bare list of dims.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeProto {
    #[serde(default)]
    pub dim: Vec<i64>,
}

/// Plain wire-form placement, as stored alongside an op's attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelConf {
    pub device_tag: String,
    #[serde(default)]
    pub device_name: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchy: Option<ShapeProto>,
}

impl ParallelConf {
    pub fn new(device_tag: impl Into<String>, device_names: &[&str]) -> Self {
        Self {
            device_tag: device_tag.into(),
            device_name: device_names.iter().map(|s| s.to_string()).collect(),
            hierarchy: None,
        }
    }

    pub fn with_hierarchy(mut self, dims: &[i64]) -> Self {
        self.hierarchy = Some(ShapeProto { dim: dims.to_vec() });
        self
    }
}

impl FromStr for ParallelConf {
    type Err = PlacementError;

    /// Parses the text form, e.g. `device_tag: "gpu", device_name: "0:0-1"`.
    fn from_str(s: &str) -> super::Result<Self> {
        text::parse_parallel_conf(s)
    }
}

/// Structured shape with a setter-style API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CfgShape {
    dims: Vec<i64>,
}

impl CfgShape {
    pub fn add_dim(&mut self, dim: i64) {
        self.dims.push(dim);
    }

    pub fn dim_size(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn elem_cnt(&self) -> i64 {
        self.dims.iter().product()
    }
}

/// Structured placement, the form the runtime accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CfgParallelConf {
    device_tag: String,
    device_names: Vec<String>,
    hierarchy: Option<CfgShape>,
}

impl CfgParallelConf {
    pub fn set_device_tag(&mut self, tag: impl Into<String>) {
        self.device_tag = tag.into();
    }

    pub fn add_device_name(&mut self, name: impl Into<String>) {
        self.device_names.push(name.into());
    }

    /// Returns the hierarchy, creating an empty one if absent.
    pub fn mutable_hierarchy(&mut self) -> &mut CfgShape {
        self.hierarchy.get_or_insert_with(CfgShape::default)
    }

    pub fn device_tag(&self) -> &str {
        &self.device_tag
    }

    pub fn device_names(&self) -> &[String] {
        &self.device_names
    }

    pub fn has_hierarchy(&self) -> bool {
        self.hierarchy.is_some()
    }

    pub fn hierarchy(&self) -> Option<&CfgShape> {
        self.hierarchy.as_ref()
    }

    /// Converts back to the plain form.
    pub fn to_plain(&self) -> ParallelConf {
        ParallelConf {
            device_tag: self.device_tag.clone(),
            device_name: self.device_names.clone(),
            hierarchy: self.hierarchy.as_ref().map(|h| ShapeProto {
                dim: h.dims.clone(),
            }),
        }
    }
}

impl From<&ParallelConf> for CfgParallelConf {
    /// Copies the tag, every device name in order, and the hierarchy dims.
    ///
    /// # Panics
    ///
    /// Panics if the plain conf carries a hierarchy with no dims.
    fn from(plain: &ParallelConf) -> Self {
        let mut cfg = CfgParallelConf::default();
        cfg.set_device_tag(plain.device_tag.as_str());
        for name in &plain.device_name {
            cfg.add_device_name(name.as_str());
        }
        if let Some(proto) = &plain.hierarchy {
            let mut hierarchy = CfgShape::default();
            for &dim in &proto.dim {
                hierarchy.add_dim(dim);
            }
            assert!(hierarchy.dim_size() > 0, "hierarchy must have at least one dim");
            *cfg.mutable_hierarchy() = hierarchy;
        }
        cfg
    }
}

/// Placement as handed back by an op-attribute lookup: either form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyParallelConf {
    Plain(ParallelConf),
    Cfg(CfgParallelConf),
}

impl AnyParallelConf {
    /// Returns the structured form, translating only when needed.
    pub fn into_cfg(self) -> CfgParallelConf {
        match self {
            AnyParallelConf::Cfg(cfg) => cfg,
            AnyParallelConf::Plain(plain) => CfgParallelConf::from(&plain),
        }
    }
}

impl From<ParallelConf> for AnyParallelConf {
    fn from(conf: ParallelConf) -> Self {
        AnyParallelConf::Plain(conf)
    }
}

impl From<CfgParallelConf> for AnyParallelConf {
    fn from(conf: CfgParallelConf) -> Self {
        AnyParallelConf::Cfg(conf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_to_cfg_keeps_everything() {
        let plain = ParallelConf::new("gpu", &["0:0-3", "1:0-3"]).with_hierarchy(&[2, 4]);
        let cfg = AnyParallelConf::from(plain.clone()).into_cfg();
        assert_eq!(cfg.device_tag(), "gpu");
        assert_eq!(cfg.device_names(), &["0:0-3".to_string(), "1:0-3".to_string()]);
        assert_eq!(cfg.hierarchy().unwrap().dims(), &[2, 4]);
        assert_eq!(cfg.to_plain(), plain);
    }

    #[test]
    fn test_cfg_passes_through() {
        let mut cfg = CfgParallelConf::default();
        cfg.set_device_tag("cpu");
        cfg.add_device_name("0:0");
        let out = AnyParallelConf::from(cfg.clone()).into_cfg();
        assert_eq!(out, cfg);
        assert!(!out.has_hierarchy());
    }

    #[test]
    #[should_panic(expected = "at least one dim")]
    fn test_empty_hierarchy_panics() {
        let plain = ParallelConf::new("cpu", &["0:0"]).with_hierarchy(&[]);
        let _ = CfgParallelConf::from(&plain);
    }

    #[test]
    fn test_plain_serde() {
        let plain = ParallelConf::new("cpu", &["0:0-1"]);
        let json = serde_json::to_string(&plain).unwrap();
        assert_eq!(json, r#"{"device_tag":"cpu","device_name":["0:0-1"]}"#);
        let back: ParallelConf = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plain);
    }
}
