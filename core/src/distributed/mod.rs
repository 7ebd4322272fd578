//! # Distributed Training
//!
//! Data parallelism: replicate the *entire model* on every rank, split the *data*, and
//! average gradients across ranks with **All-Reduce** before each optimizer step.
//!
//! ## Module Contents
//!
//! *   [`CollectiveBackend`]: the interface for communication.
//!     *   [`CpuBackend`]: ring all-reduce over channels, one thread per rank.
//!     *   [`SingleProcessBackend`]: a world of one.
//! *   [`AllReduce`]: the sum collective, placed across every rank, with batch counters.
//! *   [`DistributedDataParallel`]: gradient hooks that reduce parameters as soon as a
//!     contiguous prefix of them is ready. See [`ddp`] for the protocol.

pub mod all_reduce;
pub mod backend;
pub mod cpu_backend;
pub mod ddp;

pub use all_reduce::AllReduce;
pub use backend::{CollectiveBackend, SingleProcessBackend};
pub use cpu_backend::CpuBackend;
pub use ddp::{DistributedDataParallel, EntryState, ReadinessTable, ReducedBatch};
