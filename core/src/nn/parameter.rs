//! Trainable parameters and their gradient hooks.
//!
//! A [`Parameter`] is a shared handle: clones refer to the same value, gradient slot and
//! hook chain. Identity is the [`ParamId`] minted at construction.
//!
//! Gradients arrive through [`Parameter::deliver_grad`]. The hook chain runs first, in
//! registration order; each hook sees the gradient the previous one produced and may
//! replace it. What comes out of the chain is stored.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::Result;
use crate::tensor::Tensor;

/// Stable identity of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(u64);

impl ParamId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        ParamId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "param#{}", self.0)
    }
}

/// A gradient hook. Returning `Some` replaces the gradient; `None` keeps it.
pub type GradHook = Arc<dyn Fn(&Tensor) -> Result<Option<Tensor>> + Send + Sync>;

struct Inner {
    id: ParamId,
    name: String,
    data: Mutex<Tensor>,
    grad: Mutex<Option<Tensor>>,
    hooks: Mutex<Vec<GradHook>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct Parameter {
    inner: Arc<Inner>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, data: Tensor) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ParamId::next(),
                name: name.into(),
                data: Mutex::new(data),
                grad: Mutex::new(None),
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> ParamId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// A copy of the current value.
    pub fn data(&self) -> Tensor {
        lock(&self.inner.data).clone()
    }

    pub fn set_data(&self, data: Tensor) {
        *lock(&self.inner.data) = data;
    }

    pub fn grad(&self) -> Option<Tensor> {
        lock(&self.inner.grad).clone()
    }

    /// Stores `grad` directly, bypassing the hook chain.
    pub fn set_grad(&self, grad: Option<Tensor>) {
        *lock(&self.inner.grad) = grad;
    }

    pub fn zero_grad(&self) {
        self.set_grad(None);
    }

    /// Appends `hook` to the gradient hook chain.
    pub fn register_hook<F>(&self, hook: F)
    where
        F: Fn(&Tensor) -> Result<Option<Tensor>> + Send + Sync + 'static,
    {
        lock(&self.inner.hooks).push(Arc::new(hook));
    }

    /// Runs the hook chain over `grad` and stores the result.
    ///
    /// Hooks run without any of this parameter's locks held, so a hook may read or write
    /// other parameters' gradients. On error nothing is stored.
    pub fn deliver_grad(&self, grad: Tensor) -> Result<()> {
        let hooks: Vec<GradHook> = lock(&self.inner.hooks).clone();
        let mut grad = grad;
        for hook in &hooks {
            if let Some(replaced) = hook(&grad)? {
                grad = replaced;
            }
        }
        self.set_grad(Some(grad));
        Ok(())
    }

    pub fn downgrade(&self) -> WeakParameter {
        WeakParameter {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("shape", &lock(&self.inner.data).shape())
            .finish()
    }
}

/// A non-owning reference to a parameter.
#[derive(Clone)]
pub struct WeakParameter {
    id: ParamId,
    inner: Weak<Inner>,
}

impl WeakParameter {
    pub fn id(&self) -> ParamId {
        self.id
    }

    /// The parameter, if anything still owns it.
    pub fn upgrade(&self) -> Option<Parameter> {
        self.inner.upgrade().map(|inner| Parameter { inner })
    }
}

impl fmt::Debug for WeakParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakParameter({})", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::tensor::DType;

    fn scalar(v: f32) -> Tensor {
        Tensor::from_vec(vec![v], &[1]).unwrap()
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Parameter::new("a", scalar(1.0));
        let b = Parameter::new("b", scalar(1.0));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_hook_chain_runs_in_order() {
        let p = Parameter::new("w", scalar(1.0));
        p.register_hook(|g| Ok(Some(g.mul(2.0)?)));
        p.register_hook(|g| Ok(Some(g.add(1.0)?)));
        p.register_hook(|_| Ok(None));
        p.deliver_grad(scalar(3.0)).unwrap();
        assert_eq!(p.grad().unwrap().to_vec::<f32>().unwrap(), vec![7.0]);
    }

    #[test]
    fn test_failing_hook_stores_nothing() {
        let p = Parameter::new("w", scalar(1.0));
        p.register_hook(|_| Err(Error::Collective("down".into())));
        assert!(p.deliver_grad(scalar(1.0)).is_err());
        assert!(p.grad().is_none());
    }

    #[test]
    fn test_hook_may_touch_other_params() {
        let a = Parameter::new("a", scalar(0.0));
        let b = Parameter::new("b", scalar(0.0));
        let b_ref = b.clone();
        a.register_hook(move |g| {
            b_ref.set_grad(Some(g.clone()));
            Ok(None)
        });
        a.deliver_grad(scalar(5.0)).unwrap();
        assert_eq!(b.grad().unwrap().to_vec::<f32>().unwrap(), vec![5.0]);
    }

    #[test]
    fn test_weak_reference() {
        let p = Parameter::new("w", Tensor::zeros(&[2], DType::Float32).unwrap());
        let weak = p.downgrade();
        assert_eq!(weak.upgrade().unwrap().id(), p.id());
        drop(p);
        assert!(weak.upgrade().is_none());
    }
}
