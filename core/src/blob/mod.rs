//! # Blob objects
//!
//! A blob is a runtime-resident tensor. The host never holds its bytes; it holds a
//! [`BlobObject`], an opaque handle minted by the runtime, and moves data through the
//! instruction builder.
//!
//! Every blob object records how it is placed ([`OpArgParallelAttribute`]). The
//! `is_mirrored` flag decides which of the two [`RemoteBlob`] variants wraps it:
//!
//! - **Mirrored**: an independent replica per device. Each worker feeds and reads its own.
//! - **Consistent**: one logical tensor with a global view across the placement.
//!
//! Blob objects are shared through `Arc` and never deep-copied.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::op_attr::LogicalBlobId;
use crate::placement::ParallelDesc;
use crate::tensor::DType;

pub mod tensor_def;

pub use tensor_def::TensorDef;

/// Declared shape and dtype of a blob.
///
/// With `is_dynamic` set, `shape` is the upper bound of each dimension rather than the
/// exact extent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDesc {
    pub shape: Vec<usize>,
    pub dtype: DType,
    #[serde(default)]
    pub is_dynamic: bool,
}

impl BlobDesc {
    pub fn new(shape: &[usize], dtype: DType) -> Self {
        Self {
            shape: shape.to_vec(),
            dtype,
            is_dynamic: false,
        }
    }

    pub fn dynamic(mut self) -> Self {
        self.is_dynamic = true;
        self
    }
}

/// How an op argument is placed.
#[derive(Debug, Clone, PartialEq)]
pub struct OpArgParallelAttribute {
    parallel_desc: Arc<ParallelDesc>,
    is_mirrored: bool,
}

impl OpArgParallelAttribute {
    pub fn new(parallel_desc: Arc<ParallelDesc>, is_mirrored: bool) -> Self {
        Self {
            parallel_desc,
            is_mirrored,
        }
    }

    pub fn parallel_desc(&self) -> &Arc<ParallelDesc> {
        &self.parallel_desc
    }

    pub fn is_mirrored(&self) -> bool {
        self.is_mirrored
    }
}

/// Identifier the runtime assigns to a blob object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId(pub u64);

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob#{}", self.0)
    }
}

/// Opaque handle to a runtime-resident tensor.
#[derive(Debug)]
pub struct BlobObject {
    id: BlobId,
    op_arg_parallel_attr: OpArgParallelAttribute,
    blob_desc: Option<BlobDesc>,
}

impl BlobObject {
    pub fn new(
        id: BlobId,
        op_arg_parallel_attr: OpArgParallelAttribute,
        blob_desc: Option<BlobDesc>,
    ) -> Self {
        Self {
            id,
            op_arg_parallel_attr,
            blob_desc,
        }
    }

    pub fn id(&self) -> BlobId {
        self.id
    }

    pub fn op_arg_parallel_attr(&self) -> &OpArgParallelAttribute {
        &self.op_arg_parallel_attr
    }

    /// The declared description, when the op attribute carried one.
    pub fn blob_desc(&self) -> Option<&BlobDesc> {
        self.blob_desc.as_ref()
    }
}

/// The fields both remote blob variants carry.
#[derive(Debug, Clone)]
pub struct EagerBlob {
    lbi: LogicalBlobId,
    blob_object: Arc<BlobObject>,
    job_name: String,
}

/// A blob object bound to its logical id and owning job.
#[derive(Debug, Clone)]
pub enum RemoteBlob {
    Mirrored(EagerBlob),
    Consistent(EagerBlob),
}

impl RemoteBlob {
    /// Wraps `blob_object`, picking the variant from its placement attribute.
    pub fn wrap(
        lbi: LogicalBlobId,
        blob_object: Arc<BlobObject>,
        job_name: impl Into<String>,
    ) -> Self {
        let mirrored = blob_object.op_arg_parallel_attr().is_mirrored();
        let inner = EagerBlob {
            lbi,
            blob_object,
            job_name: job_name.into(),
        };
        if mirrored {
            RemoteBlob::Mirrored(inner)
        } else {
            RemoteBlob::Consistent(inner)
        }
    }

    fn inner(&self) -> &EagerBlob {
        match self {
            RemoteBlob::Mirrored(b) | RemoteBlob::Consistent(b) => b,
        }
    }

    pub fn lbi(&self) -> &LogicalBlobId {
        &self.inner().lbi
    }

    pub fn blob_object(&self) -> &Arc<BlobObject> {
        &self.inner().blob_object
    }

    pub fn job_name(&self) -> &str {
        &self.inner().job_name
    }

    pub fn is_mirrored(&self) -> bool {
        matches!(self, RemoteBlob::Mirrored(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::{AnyParallelConf, ParallelConf};

    fn object(mirrored: bool) -> Arc<BlobObject> {
        let conf = AnyParallelConf::from(ParallelConf::new("cpu", &["0:0"])).into_cfg();
        let desc = Arc::new(ParallelDesc::new(&conf).unwrap());
        Arc::new(BlobObject::new(
            BlobId(7),
            OpArgParallelAttribute::new(desc, mirrored),
            Some(BlobDesc::new(&[2], DType::Float32)),
        ))
    }

    #[test]
    fn test_wrap_classifies() {
        let lbi = LogicalBlobId::new("Input_0", "out");
        let mirrored = RemoteBlob::wrap(lbi.clone(), object(true), "job");
        assert!(mirrored.is_mirrored());
        assert!(matches!(mirrored, RemoteBlob::Mirrored(_)));

        let consistent = RemoteBlob::wrap(lbi, object(false), "job");
        assert!(!consistent.is_mirrored());
        assert_eq!(consistent.job_name(), "job");
        assert_eq!(consistent.lbi().to_string(), "Input_0/out");
        assert_eq!(consistent.blob_object().id(), BlobId(7));
    }

    #[test]
    fn test_wrap_shares_object() {
        let obj = object(false);
        let blob = RemoteBlob::wrap(LogicalBlobId::new("a", "b"), obj.clone(), "job");
        assert!(Arc::ptr_eq(blob.blob_object(), &obj));
    }
}
