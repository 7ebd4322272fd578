use std::fmt::Debug;
use std::sync::{Arc, PoisonError, RwLock};

use super::Parameter;
use crate::error::Result;
use crate::tensor::Tensor;

/// A Module trait for layers with trainable parameters.
///
/// # Why is this needed?
///
/// Wrappers like `DistributedDataParallel` need three things from whatever they wrap:
///
/// 1.  **Forward**: compute an output from an input.
/// 2.  **Backward**: given the gradient of the output, deliver a gradient to every parameter
///     that took part, through [`Parameter::deliver_grad`], in reverse order of use. A
///     parameter used more than once gets the sum of its contributions in a single
///     delivery.
/// 3.  **Parameters**: every parameter, in registration order.
///
/// `Send + Sync` lets a model live on each rank's thread in multi-rank tests.
pub trait Module: Debug + Send + Sync {
    fn forward(&self, input: &Tensor) -> Result<Tensor>;

    fn backward(&self, grad_output: &Tensor) -> Result<()>;

    fn parameters(&self) -> Vec<Parameter>;
}

/// A forward hook. Sees the module input and output; `Some` replaces the output.
pub type ForwardHook = Arc<dyn Fn(&Tensor, &Tensor) -> Result<Option<Tensor>> + Send + Sync>;

/// Ordered forward-hook registry.
#[derive(Default)]
pub struct ForwardHooks {
    hooks: RwLock<Vec<ForwardHook>>,
}

impl ForwardHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_forward_hook<F>(&self, hook: F)
    where
        F: Fn(&Tensor, &Tensor) -> Result<Option<Tensor>> + Send + Sync + 'static,
    {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    /// Runs every hook in order over `output`.
    pub fn run(&self, input: &Tensor, output: Tensor) -> Result<Tensor> {
        let hooks = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut output = output;
        for hook in &hooks {
            if let Some(replaced) = hook(input, &output)? {
                output = replaced;
            }
        }
        Ok(output)
    }

    pub fn len(&self) -> usize {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Debug for ForwardHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ForwardHooks({})", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_forward_hooks_chain() {
        let hooks = ForwardHooks::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        hooks.register_forward_hook(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        });
        hooks.register_forward_hook(|input, output| Ok(Some((output + input)?)));

        let x = Tensor::from_vec(vec![1.0f32], &[1]).unwrap();
        let y = Tensor::from_vec(vec![10.0f32], &[1]).unwrap();
        let out = hooks.run(&x, y).unwrap();
        assert_eq!(out.to_vec::<f32>().unwrap(), vec![11.0]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.len(), 2);
    }
}
