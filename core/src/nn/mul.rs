use std::sync::{Mutex, PoisonError};

use super::{Module, Parameter};
use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// `y = x * w`, elementwise, with a trainable `w`.
#[derive(Debug)]
pub struct Mul {
    pub w: Parameter,
    input: Mutex<Option<Tensor>>,
}

impl Mul {
    pub fn new(w: Tensor) -> Self {
        Self {
            w: Parameter::new("w", w),
            input: Mutex::new(None),
        }
    }
}

impl Module for Mul {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let out = input.mul(&self.w.data())?;
        *self.input.lock().unwrap_or_else(PoisonError::into_inner) = Some(input.clone());
        Ok(out)
    }

    /// dL/dw = dL/dy * x
    fn backward(&self, grad_output: &Tensor) -> Result<()> {
        let input = self
            .input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::Runtime("Mul::backward called before forward".into()))?;
        self.w.deliver_grad(grad_output.mul(&input)?)
    }

    fn parameters(&self) -> Vec<Parameter> {
        vec![self.w.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_forward_backward() {
        let m = Mul::new(Tensor::from_vec(vec![2.0f32, 3.0], &[2]).unwrap());
        let x = Tensor::from_vec(vec![4.0f32, 5.0], &[2]).unwrap();
        let y = m.forward(&x).unwrap();
        assert_eq!(y.to_vec::<f32>().unwrap(), vec![8.0, 15.0]);

        let ones = Tensor::from_vec(vec![1.0f32, 1.0], &[2]).unwrap();
        m.backward(&ones).unwrap();
        assert_eq!(m.w.grad().unwrap().to_vec::<f32>().unwrap(), vec![4.0, 5.0]);
    }

    #[test]
    fn test_backward_without_forward() {
        let m = Mul::new(Tensor::from_vec(vec![1.0f32], &[1]).unwrap());
        let g = Tensor::from_vec(vec![1.0f32], &[1]).unwrap();
        assert!(m.backward(&g).is_err());
    }
}
