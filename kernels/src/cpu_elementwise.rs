use crate::{KernelElem, KernelError, Result};
use rayon::prelude::*;

/// Binary elementwise operators supported on host buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    #[inline]
    fn apply<T: KernelElem>(self, a: T, b: T) -> T {
        match self {
            BinaryOp::Add => a.add_wrapping(b),
            BinaryOp::Sub => a.sub_wrapping(b),
            BinaryOp::Mul => a.mul_wrapping(b),
            BinaryOp::Div => a / b,
        }
    }
}

/// CPU implementation of a binary elementwise op.
///
/// `rhs` must either match `lhs` in length or hold a single element, which is
/// broadcast against every element of `lhs`. Integer `Add`, `Sub` and `Mul`
/// wrap on overflow. Integer division by zero panics
/// like the scalar operator does; callers restrict `Div` to float dtypes.
pub fn cpu_binary<T>(op: BinaryOp, lhs: &[T], rhs: &[T]) -> Result<Vec<T>>
where
    T: KernelElem,
{
    match rhs.len() {
        1 => {
            let scalar = rhs[0];
            Ok(lhs.par_iter().map(|&a| op.apply(a, scalar)).collect())
        }
        n if n == lhs.len() => Ok(lhs
            .par_iter()
            .zip(rhs.par_iter())
            .map(|(&a, &b)| op.apply(a, b))
            .collect()),
        n => Err(KernelError::LengthMismatch {
            lhs: lhs.len(),
            rhs: n,
        }),
    }
}
