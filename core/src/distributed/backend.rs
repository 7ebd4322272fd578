use crate::error::Result;
use crate::placement::DeviceTag;
use crate::tensor::Tensor;

/// Abstraction for a distributed communication backend.
///
/// This trait allows swapping between different communication implementations:
/// - **CPU/Ring**: [`CpuBackend`](super::CpuBackend), ranks wired together with channels.
/// - **Single process**: [`SingleProcessBackend`], every collective is the identity.
///
/// Collectives are blocking and must be issued in the same order on every rank.
pub trait CollectiveBackend: Send + Sync {
    /// Returns the rank of the current process/thread.
    fn rank(&self) -> usize;

    /// Returns the total number of processes/threads.
    fn world_size(&self) -> usize;

    /// Device kind the collectives run on.
    fn device_tag(&self) -> DeviceTag {
        DeviceTag::Cpu
    }

    /// Sums `tensor` elementwise across all ranks. Every rank gets the full sum.
    fn all_reduce_sum(&self, tensor: &Tensor) -> Result<Tensor>;

    /// Returns `root`'s `tensor` on every rank.
    fn broadcast(&self, tensor: &Tensor, root: usize) -> Result<Tensor>;
}

/// World of one. Collectives return their input.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcessBackend;

impl CollectiveBackend for SingleProcessBackend {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, tensor: &Tensor) -> Result<Tensor> {
        Ok(tensor.clone())
    }

    fn broadcast(&self, tensor: &Tensor, _root: usize) -> Result<Tensor> {
        Ok(tensor.clone())
    }
}
