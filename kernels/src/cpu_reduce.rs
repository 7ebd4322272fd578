use crate::{KernelElem, KernelError, Result};
use rayon::prelude::*;

/// Sums every element of `data`.
pub fn cpu_sum<T>(data: &[T]) -> T
where
    T: KernelElem,
{
    data.par_iter()
        .copied()
        .reduce(|| T::zero(), |a, b| a.add_wrapping(b))
}

/// Adds `src` into `dst` in place.
///
/// This is the reduce step of the ring all-reduce: each rank folds the chunk
/// received from its left neighbour into its own buffer.
pub fn cpu_accumulate<T>(dst: &mut [T], src: &[T]) -> Result<()>
where
    T: KernelElem,
{
    if dst.len() != src.len() {
        return Err(KernelError::LengthMismatch {
            lhs: dst.len(),
            rhs: src.len(),
        });
    }
    dst.par_iter_mut()
        .zip(src.par_iter())
        .for_each(|(d, &s)| *d = d.add_wrapping(s));
    Ok(())
}
