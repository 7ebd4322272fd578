//! # oneflow-eager
//!
//! Eager-mode plumbing for a dataflow runtime: interface blobs and data-parallel gradient
//! coordination.
//!
//! ## Modules
//!
//! - [`interface`]: resolve interface ops to cached blobs, feed host values in and fetch
//!   them back out.
//! - [`session`]: the session that owns the runtime, the op registry and the blob cache.
//! - [`runtime`]: instruction dispatch on a single FIFO worker.
//! - [`placement`]: parallel configurations and the device sets they describe.
//! - [`distributed`]: collectives and [`DistributedDataParallel`].
//! - [`nn`]: parameters, gradient hooks and the [`Module`](nn::Module) trait.
//! - [`mod@tensor`]: a dynamically typed host tensor.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use oneflow_eager::config::DistributedEnv;
//! use oneflow_eager::distributed::{DistributedDataParallel, SingleProcessBackend};
//! use oneflow_eager::nn::{Module, Mul};
//! use oneflow_eager::tensor::{DType, Tensor};
//!
//! let model = Mul::new(Tensor::from_vec(vec![1.0f32], &[1]).unwrap());
//! let ddp = DistributedDataParallel::new(
//!     model,
//!     Arc::new(SingleProcessBackend),
//!     &DistributedEnv::single(),
//! )
//! .unwrap();
//!
//! let x = Tensor::from_vec(vec![2.0f32], &[1]).unwrap();
//! ddp.forward(&x).unwrap();
//! ddp.backward(&Tensor::ones(&[1], DType::Float32).unwrap()).unwrap();
//! assert_eq!(ddp.module().w.grad().unwrap().to_vec::<f32>().unwrap(), vec![2.0]);
//! ```

pub mod blob;
pub mod config;
pub mod distributed;
pub mod error;
pub mod interface;
pub mod nn;
pub mod op_attr;
pub mod placement;
pub mod runtime;
pub mod session;
pub mod tensor;

pub use blob::{BlobObject, RemoteBlob};
pub use distributed::DistributedDataParallel;
pub use error::{Error, Result};
pub use interface::{
    InterfaceOps, feed_value_to_interface_blob, feed_value_to_interface_blob_object,
    get_eager_interface_blob, get_interface_blob_value,
};
pub use session::Session;
pub use tensor::{DType, Tensor, TensorError};
