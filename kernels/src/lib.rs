//! Host-side kernels for eager blobs.
//!
//! These are the element loops the tensor layer and the CPU collectives
//! dispatch to. They work on flat slices and know nothing about shapes,
//! dtypes or placement.

use num_traits::{FromPrimitive, Num, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod cpu_elementwise;
pub mod cpu_reduce;

pub use cpu_elementwise::{BinaryOp, cpu_binary};
pub use cpu_reduce::{cpu_accumulate, cpu_sum};

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Length mismatch: lhs has {lhs} elements, rhs has {rhs}")]
    LengthMismatch { lhs: usize, rhs: usize },
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Element bound of every kernel.
///
/// Covers the integer and float storages of the tensor layer. `f16` is widened
/// to `f32` before it reaches a kernel.
///
/// Integer arithmetic wraps on overflow in every build profile, the way the
/// device kernels behave. Float arithmetic is plain IEEE.
pub trait KernelElem:
    Num + Copy + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
    fn add_wrapping(self, rhs: Self) -> Self;
    fn sub_wrapping(self, rhs: Self) -> Self;
    fn mul_wrapping(self, rhs: Self) -> Self;
}

macro_rules! impl_int_elem {
    ($($t:ty),*) => {
        $(
            impl KernelElem for $t {
                #[inline]
                fn add_wrapping(self, rhs: Self) -> Self {
                    self.wrapping_add(rhs)
                }
                #[inline]
                fn sub_wrapping(self, rhs: Self) -> Self {
                    self.wrapping_sub(rhs)
                }
                #[inline]
                fn mul_wrapping(self, rhs: Self) -> Self {
                    self.wrapping_mul(rhs)
                }
            }
        )*
    };
}

macro_rules! impl_float_elem {
    ($($t:ty),*) => {
        $(
            impl KernelElem for $t {
                #[inline]
                fn add_wrapping(self, rhs: Self) -> Self {
                    self + rhs
                }
                #[inline]
                fn sub_wrapping(self, rhs: Self) -> Self {
                    self - rhs
                }
                #[inline]
                fn mul_wrapping(self, rhs: Self) -> Self {
                    self * rhs
                }
            }
        )*
    };
}

impl_int_elem!(i8, i32, i64, u8);
impl_float_elem!(f32, f64);
