//! Tensor arithmetic.
//!
//! # Overview
//!
//! The eager layer only needs a small amount of math on host values: scaling a gradient
//! by `1 / world_size`, summing buffers during a collective, and the elementwise product
//! used by the toy `Mul` module. All of it dispatches to `oneflow_eager_kernels`.
//!
//! # Operands
//!
//! The right-hand side of a binary op is an [`Operand`]: either another tensor of the same
//! dtype and shape, or a [`Scalar`] that is broadcast against every element. A one-element
//! tensor broadcasts as well.
//!
//! `float16` has no native arithmetic here; it is widened to `f32`, computed, and narrowed
//! back.
//!
//! # Examples
//!
//! ```rust
//! use oneflow_eager::tensor::Tensor;
//!
//! let a = Tensor::from_vec(vec![1.0f32, 2.0], &[2]).unwrap();
//! let b = Tensor::from_vec(vec![3.0f32, 4.0], &[2]).unwrap();
//!
//! let c = (&a + &b).unwrap();
//! assert_eq!(c.to_vec::<f32>().unwrap(), vec![4.0, 6.0]);
//!
//! let halved = a.mul(0.5).unwrap();
//! assert_eq!(halved.to_vec::<f32>().unwrap(), vec![0.5, 1.0]);
//! ```

use super::{Result, Storage, Tensor, TensorError};

use half::f16;
use num_traits::FromPrimitive;
use oneflow_eager_kernels::{BinaryOp, KernelElem, cpu_accumulate, cpu_binary, cpu_sum};
use std::ops::{Add, Div, Mul, Sub};

/// A host scalar broadcast against a tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Scalar::Int(i) => i as f64,
            Scalar::Float(f) => f,
        }
    }

    fn cast<T: FromPrimitive>(self) -> Option<T> {
        match self {
            Scalar::Int(i) => T::from_i64(i),
            Scalar::Float(f) => T::from_f64(f),
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v.into())
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar::Float(v.into())
    }
}

/// Right-hand side of a binary tensor op.
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    Scalar(Scalar),
    Tensor(&'a Tensor),
}

impl<'a> From<&'a Tensor> for Operand<'a> {
    fn from(t: &'a Tensor) -> Self {
        Operand::Tensor(t)
    }
}

impl From<Scalar> for Operand<'_> {
    fn from(s: Scalar) -> Self {
        Operand::Scalar(s)
    }
}

macro_rules! impl_scalar_operand {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Operand<'_> {
                fn from(v: $t) -> Self {
                    Operand::Scalar(v.into())
                }
            }
        )*
    };
}

impl_scalar_operand!(i32, i64, f32, f64);

impl Tensor {
    pub fn add<'a>(&self, rhs: impl Into<Operand<'a>>) -> Result<Tensor> {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn sub<'a>(&self, rhs: impl Into<Operand<'a>>) -> Result<Tensor> {
        self.binary(BinaryOp::Sub, rhs)
    }

    pub fn mul<'a>(&self, rhs: impl Into<Operand<'a>>) -> Result<Tensor> {
        self.binary(BinaryOp::Mul, rhs)
    }

    /// Elementwise division.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::Unsupported` for integer dtypes.
    pub fn div<'a>(&self, rhs: impl Into<Operand<'a>>) -> Result<Tensor> {
        if !self.dtype.is_floating_point() {
            return Err(TensorError::Unsupported(format!(
                "division on {}",
                self.dtype
            )));
        }
        self.binary(BinaryOp::Div, rhs)
    }

    /// Sums every element into a 0-d tensor of the same dtype.
    pub fn sum_all(&self) -> Result<Tensor> {
        let storage = match &self.storage {
            Storage::I8(v) => Storage::I8(vec![cpu_sum(v)]),
            Storage::I32(v) => Storage::I32(vec![cpu_sum(v)]),
            Storage::I64(v) => Storage::I64(vec![cpu_sum(v)]),
            Storage::U8(v) => Storage::U8(vec![cpu_sum(v)]),
            Storage::F16(v) => Storage::F16(vec![f16::from_f32(cpu_sum(&widen(v)))]),
            Storage::F32(v) => Storage::F32(vec![cpu_sum(v)]),
            Storage::F64(v) => Storage::F64(vec![cpu_sum(v)]),
        };
        Tensor::from_storage(storage, self.dtype, &[])
    }

    /// Adds `rhs` into `self` in place.
    ///
    /// Both tensors must agree in dtype and shape; on error `self` is left untouched.
    pub fn add_assign(&mut self, rhs: &Tensor) -> Result<()> {
        self.check_same(rhs, false)?;
        match (&mut self.storage, &rhs.storage) {
            (Storage::I8(a), Storage::I8(b)) => cpu_accumulate(a, b)?,
            (Storage::I32(a), Storage::I32(b)) => cpu_accumulate(a, b)?,
            (Storage::I64(a), Storage::I64(b)) => cpu_accumulate(a, b)?,
            (Storage::U8(a), Storage::U8(b)) => cpu_accumulate(a, b)?,
            (Storage::F16(a), Storage::F16(b)) => {
                let mut wide = widen(a);
                cpu_accumulate(&mut wide, &widen(b))?;
                *a = narrow(wide);
            }
            (Storage::F32(a), Storage::F32(b)) => cpu_accumulate(a, b)?,
            (Storage::F64(a), Storage::F64(b)) => cpu_accumulate(a, b)?,
            _ => return Err(mixed_storage()),
        }
        Ok(())
    }

    pub(crate) fn binary<'a>(&self, op: BinaryOp, rhs: impl Into<Operand<'a>>) -> Result<Tensor> {
        let storage = match rhs.into() {
            Operand::Scalar(s) => {
                let rhs = scalar_like(&self.storage, s)?;
                binary_storage(op, &self.storage, &rhs)?
            }
            Operand::Tensor(t) => {
                self.check_same(t, true)?;
                binary_storage(op, &self.storage, &t.storage)?
            }
        };
        Ok(Tensor {
            shape: self.shape.clone(),
            dtype: self.dtype,
            storage,
        })
    }

    fn check_same(&self, other: &Tensor, allow_broadcast: bool) -> Result<()> {
        if self.dtype != other.dtype {
            return Err(TensorError::DTypeMismatch {
                expected: self.dtype,
                got: other.dtype,
            });
        }
        if self.shape != other.shape && !(allow_broadcast && other.elem_count() == 1) {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        Ok(())
    }
}

fn widen(v: &[f16]) -> Vec<f32> {
    v.iter().map(|x| x.to_f32()).collect()
}

fn narrow(v: Vec<f32>) -> Vec<f16> {
    v.into_iter().map(f16::from_f32).collect()
}

fn mixed_storage() -> TensorError {
    TensorError::Unsupported("operands with different storage types".to_string())
}

fn cast_one<T: KernelElem>(s: Scalar) -> Result<Vec<T>> {
    s.cast::<T>()
        .map(|v| vec![v])
        .ok_or_else(|| TensorError::Unsupported(format!("scalar {s:?} out of range")))
}

/// One-element storage of the same variant as `like`, holding `s`.
fn scalar_like(like: &Storage, s: Scalar) -> Result<Storage> {
    Ok(match like {
        Storage::I8(_) => Storage::I8(cast_one(s)?),
        Storage::I32(_) => Storage::I32(cast_one(s)?),
        Storage::I64(_) => Storage::I64(cast_one(s)?),
        Storage::U8(_) => Storage::U8(cast_one(s)?),
        Storage::F16(_) => Storage::F16(vec![f16::from_f64(s.as_f64())]),
        Storage::F32(_) => Storage::F32(cast_one(s)?),
        Storage::F64(_) => Storage::F64(cast_one(s)?),
    })
}

fn binary_storage(op: BinaryOp, lhs: &Storage, rhs: &Storage) -> Result<Storage> {
    Ok(match (lhs, rhs) {
        (Storage::I8(a), Storage::I8(b)) => Storage::I8(cpu_binary(op, a, b)?),
        (Storage::I32(a), Storage::I32(b)) => Storage::I32(cpu_binary(op, a, b)?),
        (Storage::I64(a), Storage::I64(b)) => Storage::I64(cpu_binary(op, a, b)?),
        (Storage::U8(a), Storage::U8(b)) => Storage::U8(cpu_binary(op, a, b)?),
        (Storage::F16(a), Storage::F16(b)) => {
            Storage::F16(narrow(cpu_binary(op, &widen(a), &widen(b))?))
        }
        (Storage::F32(a), Storage::F32(b)) => Storage::F32(cpu_binary(op, a, b)?),
        (Storage::F64(a), Storage::F64(b)) => Storage::F64(cpu_binary(op, a, b)?),
        _ => return Err(mixed_storage()),
    })
}

/// Implements an operator trait for `&Tensor` by delegating to the named method.
///
/// The output is a `Result` because shapes and dtypes are only known at runtime.
macro_rules! impl_bin_op {
    ($trait:ident, $method:ident) => {
        impl $trait for &Tensor {
            type Output = Result<Tensor>;

            fn $method(self, rhs: Self) -> Self::Output {
                Tensor::$method(self, rhs)
            }
        }
    };
}

impl_bin_op!(Add, add);
impl_bin_op!(Sub, sub);
impl_bin_op!(Mul, mul);
impl_bin_op!(Div, div);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;

    #[test]
    fn test_add_sub() {
        let a = Tensor::from_vec(vec![1.0f32, 2.0, 3.0], &[3]).unwrap();
        let b = Tensor::from_vec(vec![0.5f32, 0.5, 0.5], &[3]).unwrap();
        assert_eq!((&a + &b).unwrap().to_vec::<f32>().unwrap(), vec![1.5, 2.5, 3.5]);
        assert_eq!((&a - &b).unwrap().to_vec::<f32>().unwrap(), vec![0.5, 1.5, 2.5]);
    }

    #[test]
    fn test_scalar_broadcast() {
        let a = Tensor::from_vec(vec![2i64, 4, 6], &[3]).unwrap();
        assert_eq!(a.mul(3).unwrap().to_vec::<i64>().unwrap(), vec![6, 12, 18]);

        let one = Tensor::from_vec(vec![10i64], &[1]).unwrap();
        assert_eq!(a.add(&one).unwrap().to_vec::<i64>().unwrap(), vec![12, 14, 16]);
    }

    #[test]
    fn test_integer_overflow_wraps() {
        let a = Tensor::from_vec(vec![255u8], &[1]).unwrap();
        assert_eq!(a.add(1).unwrap().to_vec::<u8>().unwrap(), vec![0]);

        let mut acc = Tensor::from_vec(vec![i32::MAX], &[1]).unwrap();
        acc.add_assign(&Tensor::from_vec(vec![1i32], &[1]).unwrap())
            .unwrap();
        assert_eq!(acc.to_vec::<i32>().unwrap(), vec![i32::MIN]);
        assert_eq!(acc.sum_all().unwrap().to_vec::<i32>().unwrap(), vec![i32::MIN]);
    }

    #[test]
    fn test_f16_goes_through_f32() {
        let a = Tensor::full(&[2], DType::Float16, 3.0).unwrap();
        let out = a.mul(0.5).unwrap();
        assert_eq!(out.dtype(), DType::Float16);
        assert_eq!(
            out.to_vec::<f16>().unwrap(),
            vec![f16::from_f32(1.5), f16::from_f32(1.5)]
        );
    }

    #[test]
    fn test_div_rejects_integers() {
        let a = Tensor::from_vec(vec![4i32, 8], &[2]).unwrap();
        assert!(matches!(a.div(2), Err(TensorError::Unsupported(_))));

        let f = Tensor::from_vec(vec![4.0f64, 8.0], &[2]).unwrap();
        assert_eq!(f.div(2).unwrap().to_vec::<f64>().unwrap(), vec![2.0, 4.0]);
    }

    #[test]
    fn test_mismatches() {
        let a = Tensor::from_vec(vec![1.0f32; 4], &[2, 2]).unwrap();
        let b = Tensor::from_vec(vec![1.0f32; 4], &[4]).unwrap();
        assert!(matches!(&a + &b, Err(TensorError::ShapeMismatch { .. })));

        let c = Tensor::from_vec(vec![1.0f64; 4], &[2, 2]).unwrap();
        assert!(matches!(&a * &c, Err(TensorError::DTypeMismatch { .. })));
    }

    #[test]
    fn test_sum_all() {
        let a = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let s = a.sum_all().unwrap();
        assert!(s.shape().is_empty());
        assert_eq!(s.to_vec::<f32>().unwrap(), vec![10.0]);
    }

    #[test]
    fn test_add_assign() {
        let mut a = Tensor::from_vec(vec![1i32, 2], &[2]).unwrap();
        let b = Tensor::from_vec(vec![10i32, 20], &[2]).unwrap();
        a.add_assign(&b).unwrap();
        assert_eq!(a.to_vec::<i32>().unwrap(), vec![11, 22]);

        let wrong = Tensor::from_vec(vec![1i32], &[1]).unwrap();
        assert!(a.add_assign(&wrong).is_err());
        assert_eq!(a.to_vec::<i32>().unwrap(), vec![11, 22]);
    }
}
