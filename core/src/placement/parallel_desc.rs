use std::collections::BTreeMap;

use super::{CfgParallelConf, DeviceTag, PlacementError, Result};

/// Largest device index a device name may mention.
pub const MAX_DEVICE_ID: i64 = 1 << 16;

/// Process layout a placement is resolved against.
///
/// Node-relative device names (`"0:0-3"`) assign one process per device, so they need to
/// know how many processes share a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessCtx {
    pub world_size: usize,
    pub node_size: usize,
}

impl ProcessCtx {
    pub fn new(node_size: usize, world_size: usize) -> Self {
        Self {
            world_size,
            node_size,
        }
    }

    fn processes_per_node(&self) -> i64 {
        (self.world_size / self.node_size.max(1)).max(1) as i64
    }
}

impl Default for ProcessCtx {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// A resolved placement: device tag, device count, owning processes and mesh shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ParallelDesc {
    conf: CfgParallelConf,
    device_tag: DeviceTag,
    parallel_num: usize,
    machine_id2device_ids: BTreeMap<i64, Vec<i64>>,
    hierarchy: Vec<i64>,
}

impl ParallelDesc {
    pub fn new(conf: &CfgParallelConf) -> Result<Self> {
        Self::with_process_ctx(conf, &ProcessCtx::default())
    }

    /// Expands every device name of `conf`.
    ///
    /// # Errors
    ///
    /// Fails on an unknown tag, a malformed device name, an empty device list, or a
    /// hierarchy whose product is not the device count. Device indices above
    /// [`MAX_DEVICE_ID`] count as malformed.
    pub fn with_process_ctx(conf: &CfgParallelConf, ctx: &ProcessCtx) -> Result<Self> {
        let device_tag: DeviceTag = conf.device_tag().parse()?;
        let mut machine_id2device_ids: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        let mut parallel_num = 0usize;

        for name in conf.device_names() {
            let (rank_based, body) = match name.strip_prefix('@') {
                Some(rest) => (true, rest),
                None => (false, name.as_str()),
            };
            let (node, devices) = parse_device_name(body)
                .ok_or_else(|| PlacementError::InvalidDeviceName(name.clone()))?;
            for device in devices.0..=devices.1 {
                let machine = if rank_based {
                    node
                } else {
                    let ppn = ctx.processes_per_node();
                    node.checked_mul(ppn)
                        .and_then(|m| m.checked_add(device % ppn))
                        .ok_or_else(|| PlacementError::InvalidDeviceName(name.clone()))?
                };
                machine_id2device_ids.entry(machine).or_default().push(device);
                parallel_num += 1;
            }
        }

        if parallel_num == 0 {
            return Err(PlacementError::NoDevices);
        }

        let hierarchy = match conf.hierarchy() {
            Some(h) => h.dims().to_vec(),
            None => vec![parallel_num as i64],
        };
        if hierarchy.is_empty() || hierarchy.iter().any(|&d| d <= 0) {
            return Err(PlacementError::InvalidHierarchy(hierarchy));
        }
        let covered = hierarchy
            .iter()
            .try_fold(1i64, |acc, &d| acc.checked_mul(d));
        if covered != Some(parallel_num as i64) {
            return Err(PlacementError::HierarchyMismatch {
                hierarchy,
                parallel_num,
            });
        }

        Ok(Self {
            conf: conf.clone(),
            device_tag,
            parallel_num,
            machine_id2device_ids,
            hierarchy,
        })
    }

    pub fn device_tag(&self) -> DeviceTag {
        self.device_tag
    }

    pub fn parallel_num(&self) -> usize {
        self.parallel_num
    }

    pub fn sorted_machine_ids(&self) -> Vec<i64> {
        self.machine_id2device_ids.keys().copied().collect()
    }

    pub fn device_ids(&self, machine_id: i64) -> Option<&[i64]> {
        self.machine_id2device_ids
            .get(&machine_id)
            .map(Vec::as_slice)
    }

    pub fn hierarchy(&self) -> &[i64] {
        &self.hierarchy
    }

    pub fn parallel_conf(&self) -> &CfgParallelConf {
        &self.conf
    }

    pub fn contains_machine(&self, machine_id: i64) -> bool {
        self.machine_id2device_ids.contains_key(&machine_id)
    }
}

/// Splits `"M:D"` or `"M:S-E"` into the machine id and an inclusive device range.
fn parse_device_name(name: &str) -> Option<(i64, (i64, i64))> {
    let (machine, devices) = name.split_once(':')?;
    let machine: i64 = machine.trim().parse().ok()?;
    let (start, end) = match devices.split_once('-') {
        Some((s, e)) => (s.trim().parse().ok()?, e.trim().parse().ok()?),
        None => {
            let d: i64 = devices.trim().parse().ok()?;
            (d, d)
        }
    };
    if machine < 0 || start < 0 || end < start || end > MAX_DEVICE_ID {
        return None;
    }
    Some((machine, (start, end)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::{AnyParallelConf, ParallelConf};

    fn cfg(tag: &str, names: &[&str]) -> CfgParallelConf {
        AnyParallelConf::from(ParallelConf::new(tag, names)).into_cfg()
    }

    #[test]
    fn test_parse_device_name() {
        assert_eq!(parse_device_name("0:3"), Some((0, (3, 3))));
        assert_eq!(parse_device_name("1:0-7"), Some((1, (0, 7))));
        assert_eq!(parse_device_name("0:3-1"), None);
        assert_eq!(parse_device_name("03"), None);
        assert_eq!(parse_device_name("a:0"), None);
        assert_eq!(parse_device_name("0:0-9223372036854775806"), None);
        assert_eq!(parse_device_name("0:65536"), Some((0, (65536, 65536))));
    }

    #[test]
    fn test_single_device() {
        let desc = ParallelDesc::new(&cfg("cpu", &["0:0"])).unwrap();
        assert_eq!(desc.parallel_num(), 1);
        assert_eq!(desc.hierarchy(), &[1]);
        assert_eq!(desc.device_ids(0), Some(&[0i64][..]));
    }

    #[test]
    fn test_invalid_name() {
        let err = ParallelDesc::new(&cfg("cpu", &["0:x"])).unwrap_err();
        assert_eq!(err, PlacementError::InvalidDeviceName("0:x".to_string()));
        assert_eq!(
            ParallelDesc::new(&cfg("cpu", &[])).unwrap_err(),
            PlacementError::NoDevices
        );
    }

    #[test]
    fn test_hierarchy_must_cover_devices() {
        let conf = AnyParallelConf::from(ParallelConf::new("gpu", &["0:0-3"]).with_hierarchy(&[2, 3]))
            .into_cfg();
        assert!(matches!(
            ParallelDesc::new(&conf),
            Err(PlacementError::HierarchyMismatch { parallel_num: 4, .. })
        ));
    }

    #[test]
    fn test_hierarchy_dims_must_be_positive() {
        let conf = AnyParallelConf::from(ParallelConf::new("gpu", &["0:0-3"]).with_hierarchy(&[-2, -2]))
            .into_cfg();
        assert_eq!(
            ParallelDesc::new(&conf).unwrap_err(),
            PlacementError::InvalidHierarchy(vec![-2, -2])
        );
    }

    #[test]
    fn test_hierarchy_product_overflow_is_mismatch() {
        let conf = AnyParallelConf::from(
            ParallelConf::new("gpu", &["0:0-1"]).with_hierarchy(&[i64::MAX, 2]),
        )
        .into_cfg();
        assert!(matches!(
            ParallelDesc::new(&conf),
            Err(PlacementError::HierarchyMismatch { parallel_num: 2, .. })
        ));
    }

    #[test]
    fn test_huge_device_range_is_rejected() {
        let err = ParallelDesc::new(&cfg("cpu", &["0:0-9223372036854775806"])).unwrap_err();
        assert!(matches!(err, PlacementError::InvalidDeviceName(_)));
    }

    #[test]
    fn test_huge_node_id_is_rejected() {
        let conf = cfg("cpu", &["9223372036854775807:0-1"]);
        let err = ParallelDesc::with_process_ctx(&conf, &ProcessCtx::new(1, 2)).unwrap_err();
        assert!(matches!(err, PlacementError::InvalidDeviceName(_)));
    }
}
