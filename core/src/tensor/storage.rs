//! Typed host storage for tensors.
//!
//! # What is Storage?
//!
//! "Storage" is the container that holds the raw numerical data of a tensor.
//! While a `Tensor` holds metadata like shape and dtype, the `Storage` holds the actual bits.
//!
//! Blob values cross the runtime boundary in many element types, so storage is a tagged
//! enum of typed vectors rather than a generic parameter. The `Element` trait connects a
//! Rust scalar type to its variant, which keeps typed construction and extraction
//! (`Tensor::from_vec`, `Tensor::to_vec`) checked at runtime without any unsafe casting.
//!
//! All byte conversions are little-endian, so a value pushed into a blob and read back
//! is bit-identical.

use crate::tensor::{DType, Result, TensorError};
use half::f16;
use std::fmt::Debug;
use std::ops::Range;

/// Typed element buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum Storage {
    I8(Vec<i8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    F16(Vec<f16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Applies `$body` to the inner vector of any storage variant.
macro_rules! with_storage {
    ($storage:expr, $v:ident => $body:expr) => {
        match $storage {
            Storage::I8($v) => $body,
            Storage::I32($v) => $body,
            Storage::I64($v) => $body,
            Storage::U8($v) => $body,
            Storage::F16($v) => $body,
            Storage::F32($v) => $body,
            Storage::F64($v) => $body,
        }
    };
}

/// Like `with_storage!`, but rewraps the result in the same variant.
macro_rules! map_storage {
    ($storage:expr, $v:ident => $body:expr) => {
        match $storage {
            Storage::I8($v) => Storage::I8($body),
            Storage::I32($v) => Storage::I32($body),
            Storage::I64($v) => Storage::I64($body),
            Storage::U8($v) => Storage::U8($body),
            Storage::F16($v) => Storage::F16($body),
            Storage::F32($v) => Storage::F32($body),
            Storage::F64($v) => Storage::F64($body),
        }
    };
}

impl Storage {
    /// Allocates a zero-filled buffer for `dtype`.
    pub fn zeros(dtype: DType, len: usize) -> Result<Self> {
        Ok(match dtype {
            DType::Char | DType::Int8 => Storage::I8(vec![0; len]),
            DType::Int32 => Storage::I32(vec![0; len]),
            DType::Int64 => Storage::I64(vec![0; len]),
            DType::UInt8 => Storage::U8(vec![0; len]),
            DType::Float16 => Storage::F16(vec![f16::ZERO; len]),
            DType::Float32 => Storage::F32(vec![0.0; len]),
            DType::Float64 => Storage::F64(vec![0.0; len]),
            DType::OFRecord | DType::TensorBuffer => {
                return Err(TensorError::UnsupportedDType(dtype));
            }
        })
    }

    /// Returns the number of elements in the storage.
    pub fn len(&self) -> usize {
        with_storage!(self, v => v.len())
    }

    /// Returns `true` if the storage contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this buffer can back a tensor of `dtype`.
    ///
    /// `Char` and `Int8` share the `I8` representation.
    pub fn matches(&self, dtype: DType) -> bool {
        matches!(
            (self, dtype),
            (Storage::I8(_), DType::Char | DType::Int8)
                | (Storage::I32(_), DType::Int32)
                | (Storage::I64(_), DType::Int64)
                | (Storage::U8(_), DType::UInt8)
                | (Storage::F16(_), DType::Float16)
                | (Storage::F32(_), DType::Float32)
                | (Storage::F64(_), DType::Float64)
        )
    }

    /// Copies out the elements in `range`.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds.
    pub fn slice(&self, range: Range<usize>) -> Storage {
        map_storage!(self, v => v[range].to_vec())
    }

    /// Appends `other`, which must be the same variant.
    pub fn extend(&mut self, other: &Storage) -> Result<()> {
        match (self, other) {
            (Storage::I8(a), Storage::I8(b)) => a.extend_from_slice(b),
            (Storage::I32(a), Storage::I32(b)) => a.extend_from_slice(b),
            (Storage::I64(a), Storage::I64(b)) => a.extend_from_slice(b),
            (Storage::U8(a), Storage::U8(b)) => a.extend_from_slice(b),
            (Storage::F16(a), Storage::F16(b)) => a.extend_from_slice(b),
            (Storage::F32(a), Storage::F32(b)) => a.extend_from_slice(b),
            (Storage::F64(a), Storage::F64(b)) => a.extend_from_slice(b),
            _ => {
                return Err(TensorError::Unsupported(
                    "concatenating different storage types".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Serializes every element as little-endian bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        with_storage!(self, v => {
            let mut out = Vec::with_capacity(std::mem::size_of_val(v.as_slice()));
            for x in v {
                x.write_le(&mut out);
            }
            out
        })
    }

    /// Rebuilds a buffer of `dtype` from little-endian bytes.
    pub fn from_le_bytes(dtype: DType, bytes: &[u8]) -> Result<Self> {
        let width = dtype.bytes()?;
        if bytes.len() % width != 0 {
            return Err(TensorError::ByteLengthMismatch {
                dtype,
                len: bytes.len(),
            });
        }
        Ok(match dtype {
            DType::Char | DType::Int8 => Storage::I8(read_all(bytes)),
            DType::Int32 => Storage::I32(read_all(bytes)),
            DType::Int64 => Storage::I64(read_all(bytes)),
            DType::UInt8 => Storage::U8(read_all(bytes)),
            DType::Float16 => Storage::F16(read_all(bytes)),
            DType::Float32 => Storage::F32(read_all(bytes)),
            DType::Float64 => Storage::F64(read_all(bytes)),
            DType::OFRecord | DType::TensorBuffer => {
                return Err(TensorError::UnsupportedDType(dtype));
            }
        })
    }
}

fn read_all<T: Element>(bytes: &[u8]) -> Vec<T> {
    bytes.chunks_exact(T::WIDTH).map(T::read_le).collect()
}

/// Rust scalar types that can live in a `Storage`.
///
/// # Requirements
/// - `Copy`: elements are moved in and out of contiguous vectors.
/// - `Send + Sync`: storages cross the runtime worker thread and the collective ring.
pub trait Element: Copy + Debug + PartialEq + Send + Sync + 'static {
    /// The tag used when a tensor is built from this type.
    const DTYPE: DType;
    /// Encoded width in bytes.
    const WIDTH: usize;

    fn into_storage(data: Vec<Self>) -> Storage;
    fn from_storage(storage: &Storage) -> Option<&[Self]>;
    fn write_le(self, out: &mut Vec<u8>);
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($t:ty, $variant:ident, $dtype:expr) => {
        impl Element for $t {
            const DTYPE: DType = $dtype;
            const WIDTH: usize = std::mem::size_of::<$t>();

            fn into_storage(data: Vec<Self>) -> Storage {
                Storage::$variant(data)
            }

            fn from_storage(storage: &Storage) -> Option<&[Self]> {
                match storage {
                    Storage::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(bytes);
                <$t>::from_le_bytes(buf)
            }
        }
    };
}

impl_element!(i8, I8, DType::Int8);
impl_element!(i32, I32, DType::Int32);
impl_element!(i64, I64, DType::Int64);
impl_element!(u8, U8, DType::UInt8);
impl_element!(f16, F16, DType::Float16);
impl_element!(f32, F32, DType::Float32);
impl_element!(f64, F64, DType::Float64);
