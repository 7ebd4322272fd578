//! Tensor definitions for feeding host values.
//!
//! Before any bytes are pushed, the host value is described as a [`TensorDef`] and checked
//! against the blob's declared [`BlobDesc`]. A failed check means nothing is dispatched.

use crate::blob::{BlobDesc, BlobObject};
use crate::tensor::{DType, Result, Tensor, TensorError};

/// Shape and dtype of a value about to be fed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorDef {
    /// Per-replica value; the shape may shrink within a dynamic blob's bounds.
    Mirrored { shape: Vec<usize>, dtype: DType },
    /// Whole logical value; the shape must match exactly.
    Fixed { shape: Vec<usize>, dtype: DType },
}

impl TensorDef {
    /// Describes `value` for `blob_object`, choosing the variant from its placement.
    pub fn for_blob(blob_object: &BlobObject, value: &Tensor) -> Self {
        let shape = value.shape().to_vec();
        let dtype = value.dtype();
        if blob_object.op_arg_parallel_attr().is_mirrored() {
            TensorDef::Mirrored { shape, dtype }
        } else {
            TensorDef::Fixed { shape, dtype }
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            TensorDef::Mirrored { shape, .. } | TensorDef::Fixed { shape, .. } => shape,
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorDef::Mirrored { dtype, .. } | TensorDef::Fixed { dtype, .. } => *dtype,
        }
    }

    /// Checks that this value fits `desc`.
    ///
    /// With no declared description only the dtype is checked.
    pub fn check(&self, desc: Option<&BlobDesc>) -> Result<()> {
        if !self.dtype().is_feedable() {
            return Err(TensorError::UnsupportedDType(self.dtype()));
        }
        let Some(desc) = desc else {
            return Ok(());
        };
        if desc.dtype != self.dtype() {
            return Err(TensorError::DTypeMismatch {
                expected: desc.dtype,
                got: self.dtype(),
            });
        }
        let shape_mismatch = || TensorError::ShapeMismatch {
            expected: desc.shape.clone(),
            got: self.shape().to_vec(),
        };
        match self {
            TensorDef::Mirrored { shape, .. } if desc.is_dynamic => {
                if shape.len() != desc.shape.len() {
                    return Err(shape_mismatch());
                }
                for (dim, (&got, &max)) in shape.iter().zip(&desc.shape).enumerate() {
                    if got > max {
                        return Err(TensorError::DimExceedsMax { dim, got, max });
                    }
                }
                Ok(())
            }
            _ if self.shape() != desc.shape.as_slice() => Err(shape_mismatch()),
            _ => Ok(()),
        }
    }
}
