use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::CollectiveBackend;
use crate::error::{Error, Result};
use crate::placement::{AnyParallelConf, ParallelConf, ParallelDesc};
use crate::tensor::Tensor;

/// Sum all-reduce across every rank of a backend.
///
/// Placed on `device_name: "0:0-{world_size - 1}"` with the backend's device tag, so the
/// placement must cover exactly `world_size` devices.
pub struct AllReduce {
    backend: Arc<dyn CollectiveBackend>,
    parallel_desc: ParallelDesc,
    batches: AtomicU64,
    collectives: AtomicU64,
}

impl AllReduce {
    pub fn new(backend: Arc<dyn CollectiveBackend>) -> Result<Self> {
        let world_size = backend.world_size();
        let placement = format!(
            "device_tag: \"{}\", device_name: \"0:0-{}\"",
            backend.device_tag(),
            world_size.saturating_sub(1)
        );
        let conf: ParallelConf = placement.parse()?;
        let parallel_desc = ParallelDesc::new(&AnyParallelConf::from(conf).into_cfg())?;
        if parallel_desc.parallel_num() != world_size {
            return Err(Error::Collective(format!(
                "placement `{placement}` covers {} devices, world size is {world_size}",
                parallel_desc.parallel_num()
            )));
        }
        Ok(Self {
            backend,
            parallel_desc,
            batches: AtomicU64::new(0),
            collectives: AtomicU64::new(0),
        })
    }

    pub fn world_size(&self) -> usize {
        self.backend.world_size()
    }

    pub fn rank(&self) -> usize {
        self.backend.rank()
    }

    pub fn parallel_desc(&self) -> &ParallelDesc {
        &self.parallel_desc
    }

    /// One collective.
    pub fn all_reduce(&self, tensor: &Tensor) -> Result<Tensor> {
        self.collectives.fetch_add(1, Ordering::Relaxed);
        self.backend.all_reduce_sum(tensor)
    }

    /// Reduces `tensors` as one dispatch batch, one collective per tensor, in order.
    pub fn reduce_batch(&self, tensors: &[Tensor]) -> Result<Vec<Tensor>> {
        self.batches.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            rank = self.rank(),
            size = tensors.len(),
            "all-reduce batch"
        );
        tensors.iter().map(|t| self.all_reduce(t)).collect()
    }

    /// Batches dispatched so far.
    pub fn batch_count(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Collectives dispatched so far.
    pub fn collective_count(&self) -> u64 {
        self.collectives.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AllReduce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllReduce")
            .field("rank", &self.rank())
            .field("world_size", &self.world_size())
            .field("batches", &self.batch_count())
            .finish()
    }
}
