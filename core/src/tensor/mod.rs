//! Host tensors.
//!
//! # What is a Tensor here?
//!
//! A `Tensor` is the host-side value that flows into and out of runtime blobs: a flat,
//! row-major buffer plus a dynamic shape and a [`DType`] tag. Feeding a blob pushes a
//! tensor's bytes into the runtime; fetching a blob yields a new tensor.
//!
//! Unlike the blob objects in [`crate::blob`], tensors own their data and are cheap to
//! reason about: they are plain values with no placement attached.
//!
//! ## Example: Creating and Inspecting a Tensor
//!
//! ```rust
//! use oneflow_eager::tensor::{DType, Tensor};
//!
//! let tensor = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
//!
//! assert_eq!(tensor.shape(), &[2, 3]);
//! assert_eq!(tensor.dtype(), DType::Float32);
//! assert_eq!(tensor.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! ```

use oneflow_eager_kernels::BinaryOp;
use thiserror::Error;

pub mod dtype;
pub mod ops;
pub mod storage;

pub use dtype::DType;
pub use ops::{Operand, Scalar};
pub use storage::{Element, Storage};

/// Error type for host tensor construction and conversion.
///
/// Feed-path validation failures are reported through this type as well, which is why the
/// crate error wraps it as a conversion error.
#[derive(Error, Debug)]
pub enum TensorError {
    /// The shape of the data does not match the expected shape.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// Element count does not match the product of the shape.
    #[error("Element count mismatch: shape {shape:?} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Vec<usize>,
        expected: usize,
        got: usize,
    },
    /// Element type does not match the expected one.
    #[error("DType mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },
    /// The dtype has no host representation.
    #[error("Unsupported dtype: {0}")]
    UnsupportedDType(DType),
    /// A dtype name could not be parsed.
    #[error("Unknown dtype: {0}")]
    UnknownDType(String),
    /// A byte buffer is not a whole number of elements.
    #[error("Byte length {len} is not a multiple of the element size of {dtype}")]
    ByteLengthMismatch { dtype: DType, len: usize },
    /// A dimension exceeds the declared (dynamic) maximum.
    #[error("Dimension {dim} of size {got} exceeds the declared maximum {max}")]
    DimExceedsMax { dim: usize, got: usize, max: usize },
    /// The requested operation is not supported (e.g., for a specific rank or type).
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;

impl From<oneflow_eager_kernels::KernelError> for TensorError {
    fn from(e: oneflow_eager_kernels::KernelError) -> Self {
        match e {
            oneflow_eager_kernels::KernelError::LengthMismatch { lhs, rhs } => {
                TensorError::ShapeMismatch {
                    expected: vec![lhs],
                    got: vec![rhs],
                }
            }
        }
    }
}

/// A dense, row-major host tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    dtype: DType,
    storage: Storage,
}

impl Tensor {
    /// Creates a tensor from a vector of elements and a shape.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ElementCountMismatch` if `data.len()` is not the product of `shape`.
    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        Self::from_storage(T::into_storage(data), T::DTYPE, shape)
    }

    /// Creates a tensor over an existing storage.
    ///
    /// `dtype` lets a caller pick between tags that share a representation (`Char` vs
    /// `Int8`).
    pub fn from_storage(storage: Storage, dtype: DType, shape: &[usize]) -> Result<Self> {
        if !storage.matches(dtype) {
            return Err(TensorError::UnsupportedDType(dtype));
        }
        let expected: usize = shape.iter().product();
        if storage.len() != expected {
            return Err(TensorError::ElementCountMismatch {
                shape: shape.to_vec(),
                expected,
                got: storage.len(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            dtype,
            storage,
        })
    }

    /// Creates a zero-filled tensor.
    pub fn zeros(shape: &[usize], dtype: DType) -> Result<Self> {
        let storage = Storage::zeros(dtype, shape.iter().product())?;
        Ok(Self {
            shape: shape.to_vec(),
            dtype,
            storage,
        })
    }

    /// Creates a tensor filled with ones.
    pub fn ones(shape: &[usize], dtype: DType) -> Result<Self> {
        Self::full(shape, dtype, Scalar::Int(1))
    }

    /// Creates a tensor with every element set to `value`.
    pub fn full(shape: &[usize], dtype: DType, value: impl Into<Scalar>) -> Result<Self> {
        let zeros = Self::zeros(shape, dtype)?;
        zeros.binary(BinaryOp::Add, Operand::Scalar(value.into()))
    }

    /// Rebuilds a tensor from little-endian bytes, as produced by [`Tensor::to_le_bytes`].
    pub fn from_le_bytes(bytes: &[u8], dtype: DType, shape: &[usize]) -> Result<Self> {
        let storage = Storage::from_le_bytes(dtype, bytes)?;
        Self::from_storage(storage, dtype, shape)
    }

    /// Serializes the elements as little-endian bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.storage.to_le_bytes()
    }

    /// Copies the elements out as `T`.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::DTypeMismatch` if `T` is not the tensor's element type.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        T::from_storage(&self.storage)
            .map(<[T]>::to_vec)
            .ok_or(TensorError::DTypeMismatch {
                expected: self.dtype,
                got: T::DTYPE,
            })
    }

    /// Returns a tensor with the same data and a new shape.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let new_size: usize = shape.iter().product();
        if new_size != self.elem_count() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![self.elem_count()],
                got: vec![new_size],
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            dtype: self.dtype,
            storage: self.storage.clone(),
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn into_storage(self) -> Storage {
        self.storage
    }

    /// Returns the total number of elements in the tensor.
    pub fn elem_count(&self) -> usize {
        self.storage.len()
    }

    /// Splits the flattened elements into `parts` contiguous 1-d chunks.
    ///
    /// Chunks hold `ceil(len / parts)` elements except at the end, where they may be
    /// shorter or empty.
    pub fn split_flat(&self, parts: usize) -> Vec<Tensor> {
        let len = self.elem_count();
        let chunk = len.div_ceil(parts.max(1));
        (0..parts.max(1))
            .map(|i| {
                let start = (i * chunk).min(len);
                let end = (start + chunk).min(len);
                Tensor {
                    shape: vec![end - start],
                    dtype: self.dtype,
                    storage: self.storage.slice(start..end),
                }
            })
            .collect()
    }

    /// Joins chunks produced by [`Tensor::split_flat`] back into a tensor of `shape`.
    pub fn concat_flat(parts: &[Tensor], shape: &[usize]) -> Result<Tensor> {
        let Some(first) = parts.first() else {
            return Err(TensorError::Unsupported("concatenating no tensors".to_string()));
        };
        let mut storage = first.storage.clone();
        for part in &parts[1..] {
            if part.dtype != first.dtype {
                return Err(TensorError::DTypeMismatch {
                    expected: first.dtype,
                    got: part.dtype,
                });
            }
            storage.extend(&part.storage)?;
        }
        Tensor::from_storage(storage, first.dtype, shape)
    }

    /// Number of bytes the elements occupy once serialized.
    pub fn nbytes(&self) -> usize {
        // Host dtypes always have a width.
        self.elem_count() * self.dtype.bytes().unwrap_or(0)
    }
}
