//! # Interface blobs
//!
//! Interface ops are the named entry and exit points of a job. This module turns such a
//! name into a live blob and moves host values in and out of it.
//!
//! ## Resolution
//!
//! [`InterfaceOps::resolve`] looks the op up (attribute, job, placement), converts the
//! placement to its structured form, asks the runtime for a lazy-ref blob object inside a
//! single yielding dispatch, and wraps the result as a mirrored or consistent blob. The
//! wrapped blob is cached on the session: resolving the same name again returns the same
//! `Arc` without touching the runtime.
//!
//! ## Feed and fetch
//!
//! ```rust
//! use oneflow_eager::config::SessionConfig;
//! use oneflow_eager::op_attr::OpAttribute;
//! use oneflow_eager::placement::ParallelConf;
//! use oneflow_eager::session::Session;
//! use oneflow_eager::tensor::{DType, Tensor};
//! use oneflow_eager::op_attr::InterfaceOpDecl;
//!
//! let config = SessionConfig {
//!     interface_ops: vec![InterfaceOpDecl {
//!         job_name: "train".into(),
//!         op_attribute: OpAttribute::interface("Input_0"),
//!         parallel_conf: ParallelConf::new("cpu", &["0:0"]),
//!     }],
//!     ..Default::default()
//! };
//! let session = Session::from_config(&config).unwrap();
//! let ops = session.interface();
//!
//! let ones = Tensor::ones(&[3, 4], DType::Float32).unwrap();
//! ops.feed_by_name("Input_0", &ones).unwrap();
//! assert_eq!(ops.fetch("Input_0").unwrap(), ones);
//! ```
//!
//! Feed and fetch sync the session first when it runs in normal mode; resolution syncs
//! only on a cache miss. Feeding validates the value against the blob's declared
//! description before anything is dispatched.

use std::sync::Arc;

use crate::blob::{BlobObject, RemoteBlob, TensorDef};
use crate::error::Result;
use crate::op_attr::{IntoLogicalBlobId, LogicalBlobId};
use crate::runtime::{logical_run, logical_run_with_yield};
use crate::session::{Session, current_session};
use crate::tensor::Tensor;

/// Interface-op operations bound to one session.
#[derive(Debug, Clone, Copy)]
pub struct InterfaceOps<'s> {
    session: &'s Session,
}

impl<'s> InterfaceOps<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self { session }
    }

    /// Returns the blob behind interface op `op_name`, materializing it on first use.
    ///
    /// A cached blob comes back without touching the runtime. A miss syncs first in
    /// normal mode.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` from the resolver for an unknown name, `Error::Placement` for a
    /// placement the runtime cannot expand, or whatever the dispatch reports.
    ///
    /// # Panics
    ///
    /// Panics if the op declares more than one output.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn resolve(&self, op_name: &str) -> Result<Arc<RemoteBlob>> {
        if let Some(blob) = self.session.cached_blob(op_name) {
            return Ok(blob);
        }
        self.session.find_or_create_blob(op_name, || {
            self.session.sync_if_normal()?;
            self.create_blob(op_name)
        })
    }

    fn create_blob(&self, op_name: &str) -> Result<RemoteBlob> {
        let resolver = self.session.resolver();
        let op_attribute = resolver.op_attribute_for(op_name)?;
        let job_name = resolver.job_name_for(op_name)?;
        let parallel_conf = resolver.parallel_conf_for(op_name)?.into_cfg();
        let lbi = LogicalBlobId::new(op_name, op_attribute.sole_output_bn());

        tracing::debug!(%op_name, %job_name, "materializing interface blob");
        let op_name = op_name.to_string();
        let mut blobs = logical_run_with_yield(self.session.runtime(), 1, move |builder, y| {
            let blob_object =
                builder.make_lazy_ref_blob_object(&op_name, &op_attribute, &parallel_conf)?;
            y.emit(RemoteBlob::wrap(lbi, blob_object, job_name));
            Ok(())
        })?;
        Ok(blobs.remove(0))
    }

    /// Reads the current value of interface op `op_name` back to the host.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn fetch(&self, op_name: &str) -> Result<Tensor> {
        self.session.sync_if_normal()?;
        let job_name = self.session.resolver().job_name_for(op_name)?;
        let blob = self.resolve(op_name)?;
        let op_attribute = self.session.resolver().op_attribute_for(op_name)?;
        let lbi = (op_name, op_attribute.sole_output_bn()).into_lbi()?;
        self.read_value(lbi, blob.blob_object().clone(), job_name)
    }

    /// Reads the value behind `blob_object`, addressed as `lbi`.
    pub fn read_value(
        &self,
        lbi: impl IntoLogicalBlobId,
        blob_object: Arc<BlobObject>,
        job_name: impl Into<String>,
    ) -> Result<Tensor> {
        let remote = RemoteBlob::wrap(lbi.into_lbi()?, blob_object, job_name);
        let mut values = logical_run_with_yield(self.session.runtime(), 1, move |builder, y| {
            tracing::trace!(lbi = %remote.lbi(), mirrored = remote.is_mirrored(), "read blob");
            y.emit(builder.read_blob(remote.blob_object())?);
            Ok(())
        })?;
        Ok(values.remove(0))
    }

    /// Pushes `value` into `blob_object`.
    ///
    /// # Errors
    ///
    /// `Error::Conversion` when `value` does not fit the blob's declared dtype or shape.
    /// Nothing is dispatched in that case.
    #[tracing::instrument(level = "debug", skip_all, fields(blob = %blob_object.id()))]
    pub fn feed(&self, blob_object: &Arc<BlobObject>, value: &Tensor) -> Result<()> {
        self.session.sync_if_normal()?;
        let tensor_def = TensorDef::for_blob(blob_object, value);
        tensor_def.check(blob_object.blob_desc())?;

        let blob_object = blob_object.clone();
        let value = value.clone();
        logical_run(self.session.runtime(), move |builder| {
            builder.feed_blob(&blob_object, &tensor_def, &value)
        })
    }

    /// Resolves interface op `op_name`, then feeds `value` into it.
    pub fn feed_by_name(&self, op_name: &str, value: &Tensor) -> Result<()> {
        self.session.sync_if_normal()?;
        let blob = self.resolve(op_name)?;
        self.feed(blob.blob_object(), value)
    }
}

/// [`InterfaceOps::resolve`] on the current session.
pub fn get_eager_interface_blob(op_name: &str) -> Result<Arc<RemoteBlob>> {
    current_session()?.interface().resolve(op_name)
}

/// [`InterfaceOps::fetch`] on the current session.
pub fn get_interface_blob_value(op_name: &str) -> Result<Tensor> {
    current_session()?.interface().fetch(op_name)
}

/// [`InterfaceOps::feed`] on the current session.
pub fn feed_value_to_interface_blob_object(
    blob_object: &Arc<BlobObject>,
    value: &Tensor,
) -> Result<()> {
    current_session()?.interface().feed(blob_object, value)
}

/// [`InterfaceOps::feed_by_name`] on the current session.
pub fn feed_value_to_interface_blob(op_name: &str, value: &Tensor) -> Result<()> {
    current_session()?.interface().feed_by_name(op_name, value)
}
