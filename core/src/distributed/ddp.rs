//! # Distributed data parallel
//!
//! Every rank holds a full replica of the model and computes gradients on its own slice of
//! the data. Before the optimizer step, each gradient is averaged across ranks with an
//! all-reduce.
//!
//! ## When to reduce
//!
//! Backpropagation produces gradients one parameter at a time, roughly in reverse order of
//! registration. [`ReadinessTable`] keeps the parameters in exactly that reversed order
//! and, whenever a gradient arrives, reduces the longest ready prefix that has not been
//! reduced yet:
//!
//! ```text
//! registration: [p1, p2, p3]      table: [p3, p2, p1]
//!
//! p2 ready  ->  head p3 not ready, nothing reduced
//! p3 ready  ->  reduce [p3, p2]   (batch 1)
//! p1 ready  ->  reduce [p1]       (batch 2)
//! ```
//!
//! Reducing in table order on every rank keeps the collective sequence identical across
//! ranks even when backward visits parameters in different orders.
//!
//! ## Hooks
//!
//! [`DistributedDataParallel::new`] installs two gradient hooks on every parameter: the
//! first divides the gradient by the world size, the second runs the table transition and
//! the all-reduce. A forward hook resets the table after every forward pass.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{AllReduce, CollectiveBackend};
use crate::config::DistributedEnv;
use crate::error::{Error, Result};
use crate::nn::{ForwardHooks, Module, ParamId, Parameter, WeakParameter};
use crate::tensor::Tensor;

/// Per-pass state of one table entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryState {
    pub ready: bool,
    pub reduced: bool,
    /// The parameter is gone; the walk skips it.
    pub deleted: bool,
}

#[derive(Debug, Clone)]
struct Entry {
    param: ParamId,
    state: EntryState,
}

/// The parameters reduced by one transition, in table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducedBatch {
    params: Vec<ParamId>,
    trigger: ParamId,
}

impl ReducedBatch {
    pub fn params(&self) -> &[ParamId] {
        &self.params
    }

    /// The parameter whose gradient arrival produced this batch.
    pub fn trigger(&self) -> ParamId {
        self.trigger
    }

    pub fn includes_trigger(&self) -> bool {
        self.params.contains(&self.trigger)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Gradient readiness of every parameter, in reverse registration order.
#[derive(Debug, Clone, Default)]
pub struct ReadinessTable {
    entries: Vec<Entry>,
    index: HashMap<ParamId, usize>,
}

impl ReadinessTable {
    /// Builds the table from parameters in registration order.
    pub fn new(params: impl IntoIterator<Item = ParamId>) -> Self {
        let mut ids: Vec<ParamId> = params.into_iter().collect();
        ids.reverse();
        let index = ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let entries = ids
            .into_iter()
            .map(|param| Entry {
                param,
                state: EntryState::default(),
            })
            .collect();
        Self { entries, index }
    }

    /// Marks `param` ready and reduces the ready prefix.
    ///
    /// Walks from the head, skipping reduced and deleted entries, and takes every ready
    /// entry until the first one that is not ready. Returns `None` when nothing new became
    /// reducible, or when `param` is not in the table.
    pub fn on_gradient_ready(&mut self, param: ParamId) -> Option<ReducedBatch> {
        let &idx = self.index.get(&param)?;
        self.entries[idx].state.ready = true;

        let mut params = Vec::new();
        for entry in &mut self.entries {
            let state = &mut entry.state;
            if state.deleted || state.reduced {
                continue;
            }
            if !state.ready {
                break;
            }
            state.reduced = true;
            params.push(entry.param);
        }
        (!params.is_empty()).then_some(ReducedBatch {
            params,
            trigger: param,
        })
    }

    pub fn mark_deleted(&mut self, param: ParamId) {
        if let Some(&idx) = self.index.get(&param) {
            self.entries[idx].state.deleted = true;
        }
    }

    /// Clears `ready` and `reduced` on every entry.
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.state.ready = false;
            entry.state.reduced = false;
        }
    }

    /// Undoes `batch` after its collective failed.
    ///
    /// Its entries go back to unreduced, and the trigger to not ready since its gradient
    /// was never stored. The next arrival retries the prefix.
    pub fn abort(&mut self, batch: &ReducedBatch) {
        for id in &batch.params {
            if let Some(&idx) = self.index.get(id) {
                self.entries[idx].state.reduced = false;
            }
        }
        if let Some(&idx) = self.index.get(&batch.trigger) {
            self.entries[idx].state.ready = false;
        }
    }

    pub fn state(&self, param: ParamId) -> Option<EntryState> {
        self.index.get(&param).map(|&i| self.entries[i].state)
    }

    /// Parameter ids in table order.
    pub fn order(&self) -> Vec<ParamId> {
        self.entries.iter().map(|e| e.param).collect()
    }

    /// Live entries still waiting for a gradient, in table order.
    pub fn pending(&self) -> Vec<ParamId> {
        self.entries
            .iter()
            .filter(|e| !e.state.deleted && !e.state.ready)
            .map(|e| e.param)
            .collect()
    }

    pub fn all_reduced(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.state.deleted || e.state.reduced)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn lock(table: &Mutex<ReadinessTable>) -> MutexGuard<'_, ReadinessTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wraps a module so that its gradients are averaged across ranks during backward.
#[derive(Debug)]
pub struct DistributedDataParallel<M: Module> {
    module: M,
    table: Arc<Mutex<ReadinessTable>>,
    all_reduce: Arc<AllReduce>,
    params: Arc<Vec<WeakParameter>>,
    forward_hooks: ForwardHooks,
}

impl<M: Module> DistributedDataParallel<M> {
    /// Installs the gradient and forward hooks on `module`.
    ///
    /// # Errors
    ///
    /// `Error::Config` if `env` and `backend` disagree on rank or world size.
    ///
    /// # Panics
    ///
    /// Panics if `env.local_rank != env.rank`: one process per device on a single node
    /// is the only supported topology.
    pub fn new(module: M, backend: Arc<dyn CollectiveBackend>, env: &DistributedEnv) -> Result<Self> {
        assert_eq!(
            env.local_rank, env.rank,
            "DistributedDataParallel needs local_rank == rank (single node, one process per device)"
        );
        if env.rank != backend.rank() || env.world_size != backend.world_size() {
            return Err(Error::Config(format!(
                "environment says rank {}/{}, backend says {}/{}",
                env.rank,
                env.world_size,
                backend.rank(),
                backend.world_size()
            )));
        }

        let world_size = backend.world_size() as i64;
        let all_reduce = Arc::new(AllReduce::new(backend)?);
        let params = module.parameters();
        let table = Arc::new(Mutex::new(ReadinessTable::new(
            params.iter().map(Parameter::id),
        )));
        let weak: Arc<Vec<WeakParameter>> =
            Arc::new(params.iter().map(Parameter::downgrade).collect());

        for param in &params {
            param.register_hook(move |grad| Ok(Some(grad.div(world_size)?)));
            param.register_hook(all_reduce_hook(
                param.id(),
                table.clone(),
                all_reduce.clone(),
                weak.clone(),
            ));
        }

        let forward_hooks = ForwardHooks::new();
        let reset_table = table.clone();
        forward_hooks.register_forward_hook(move |_, _| {
            lock(&reset_table).reset();
            Ok(None)
        });

        tracing::info!(
            rank = env.rank,
            world_size,
            params = params.len(),
            "data parallel module ready"
        );
        Ok(Self {
            module,
            table,
            all_reduce,
            params: weak,
            forward_hooks,
        })
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn all_reduce(&self) -> &AllReduce {
        &self.all_reduce
    }

    /// A copy of the readiness table.
    pub fn readiness(&self) -> ReadinessTable {
        lock(&self.table).clone()
    }

    pub fn forward_hooks(&self) -> &ForwardHooks {
        &self.forward_hooks
    }

    fn param(&self, id: ParamId) -> Option<Parameter> {
        self.params
            .iter()
            .find(|p| p.id() == id)
            .and_then(WeakParameter::upgrade)
    }
}

/// The second gradient hook: mark ready, then reduce whatever prefix became ready.
///
/// A parameter takes one gradient per backward pass. A second delivery while its entry
/// is ready is an error; modules accumulate every contribution before delivering.
fn all_reduce_hook(
    me: ParamId,
    table: Arc<Mutex<ReadinessTable>>,
    all_reduce: Arc<AllReduce>,
    params: Arc<Vec<WeakParameter>>,
) -> impl Fn(&Tensor) -> Result<Option<Tensor>> + Send + Sync + 'static {
    move |grad: &Tensor| -> Result<Option<Tensor>> {
        let batch = {
            let mut table = lock(&table);
            for p in params.iter() {
                if p.upgrade().is_none() {
                    table.mark_deleted(p.id());
                }
            }
            if table.state(me).is_some_and(|s| s.ready) {
                return Err(Error::Runtime(format!(
                    "{me} received a second gradient in one backward pass"
                )));
            }
            table.on_gradient_ready(me)
        };
        let Some(batch) = batch else {
            tracing::trace!(param = %me, "gradient ready, prefix blocked");
            return Ok(None);
        };

        reduce_ready(grad, &batch, &all_reduce, &params).inspect_err(|e| {
            tracing::warn!(param = %me, error = %e, "all-reduce batch failed");
            lock(&table).abort(&batch);
        })
    }
}

/// Reduces one batch. The trigger's reduced gradient is returned as its new gradient;
/// the other parameters already stored their scaled gradients and get them overwritten.
/// Nothing is written unless the whole batch reduces.
fn reduce_ready(
    grad: &Tensor,
    batch: &ReducedBatch,
    all_reduce: &AllReduce,
    params: &[WeakParameter],
) -> Result<Option<Tensor>> {
    let mut inputs = Vec::with_capacity(batch.len());
    let mut targets = Vec::with_capacity(batch.len());
    for &id in batch.params() {
        if id == batch.trigger() {
            inputs.push(grad.clone());
            targets.push(None);
            continue;
        }
        let Some(param) = params
            .iter()
            .find(|p| p.id() == id)
            .and_then(WeakParameter::upgrade)
        else {
            continue;
        };
        let stored = param
            .grad()
            .ok_or_else(|| Error::Runtime(format!("{id} is ready but holds no gradient")))?;
        inputs.push(stored);
        targets.push(Some(param));
    }

    let reduced = all_reduce.reduce_batch(&inputs)?;
    let mut own = None;
    for (target, value) in targets.into_iter().zip(reduced) {
        match target {
            None => own = Some(value),
            Some(param) => param.set_grad(Some(value)),
        }
    }
    Ok(own)
}

impl<M: Module> Module for DistributedDataParallel<M> {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let output = self.module.forward(input)?;
        self.forward_hooks.run(input, output)
    }

    /// Runs the wrapped backward, then gives every parameter that received no gradient a
    /// zero gradient so that all ranks issue the same collectives.
    fn backward(&self, grad_output: &Tensor) -> Result<()> {
        self.module.backward(grad_output)?;
        let pending = lock(&self.table).pending();
        for id in pending {
            let Some(param) = self.param(id) else {
                continue;
            };
            tracing::warn!(param = %id, name = param.name(), "unused parameter, reducing a zero gradient");
            let data = param.data();
            param.deliver_grad(Tensor::zeros(data.shape(), data.dtype())?)?;
        }
        Ok(())
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.module.parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::SingleProcessBackend;
    use crate::nn::Mul;
    use crate::tensor::DType;

    fn params(n: usize) -> Vec<Parameter> {
        (0..n)
            .map(|i| Parameter::new(format!("p{}", i + 1), Tensor::ones(&[1], DType::Float32).unwrap()))
            .collect()
    }

    #[test]
    fn test_table_is_reversed() {
        let ps = params(3);
        let table = ReadinessTable::new(ps.iter().map(Parameter::id));
        assert_eq!(table.order(), vec![ps[2].id(), ps[1].id(), ps[0].id()]);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_out_of_order_scenario() {
        let ps = params(3);
        let (p1, p2, p3) = (ps[0].id(), ps[1].id(), ps[2].id());
        let mut table = ReadinessTable::new([p1, p2, p3]);

        assert_eq!(table.on_gradient_ready(p2), None);
        let batch = table.on_gradient_ready(p3).unwrap();
        assert_eq!(batch.params(), &[p3, p2]);
        assert!(batch.includes_trigger());
        let batch = table.on_gradient_ready(p1).unwrap();
        assert_eq!(batch.params(), &[p1]);
        assert!(table.all_reduced());
    }

    #[test]
    fn test_deleted_entries_do_not_block() {
        let ps = params(3);
        let (p1, p2, p3) = (ps[0].id(), ps[1].id(), ps[2].id());
        let mut table = ReadinessTable::new([p1, p2, p3]);
        table.mark_deleted(p3);

        let batch = table.on_gradient_ready(p2).unwrap();
        assert_eq!(batch.params(), &[p2]);
        assert!(table.state(p3).unwrap().deleted);
        assert!(!table.state(p3).unwrap().reduced);
        assert_eq!(table.pending(), vec![p1]);
    }

    #[test]
    fn test_reset_clears_partial_pass() {
        let ps = params(3);
        let mut table = ReadinessTable::new(ps.iter().map(Parameter::id));
        table.on_gradient_ready(ps[2].id());
        table.on_gradient_ready(ps[0].id());
        table.reset();
        for p in &ps {
            let s = table.state(p.id()).unwrap();
            assert!(!s.ready && !s.reduced);
        }
    }

    #[test]
    fn test_unknown_param_is_ignored() {
        let ps = params(2);
        let other = params(1);
        let mut table = ReadinessTable::new(ps.iter().map(Parameter::id));
        assert_eq!(table.on_gradient_ready(other[0].id()), None);
    }

    #[test]
    fn test_single_process_ddp() {
        let module = Mul::new(Tensor::from_vec(vec![1.0f32], &[1]).unwrap());
        let ddp = DistributedDataParallel::new(
            module,
            Arc::new(SingleProcessBackend),
            &DistributedEnv::single(),
        )
        .unwrap();

        let x = Tensor::from_vec(vec![3.0f32], &[1]).unwrap();
        let y = ddp.forward(&x).unwrap();
        assert_eq!(y.to_vec::<f32>().unwrap(), vec![3.0]);
        ddp.backward(&Tensor::ones(&[1], DType::Float32).unwrap()).unwrap();

        assert_eq!(ddp.module().w.grad().unwrap().to_vec::<f32>().unwrap(), vec![3.0]);
        assert_eq!(ddp.all_reduce().batch_count(), 1);
        assert!(ddp.readiness().all_reduced());

        ddp.forward(&x).unwrap();
        assert!(!ddp.readiness().all_reduced());
    }

    #[test]
    fn test_abort_restores_prefix() {
        let ps = params(2);
        let (p1, p2) = (ps[0].id(), ps[1].id());
        let mut table = ReadinessTable::new([p1, p2]);
        assert!(table.on_gradient_ready(p1).is_none());
        let batch = table.on_gradient_ready(p2).unwrap();
        table.abort(&batch);

        assert_eq!(table.state(p2), Some(EntryState::default()));
        let p1_state = table.state(p1).unwrap();
        assert!(p1_state.ready && !p1_state.reduced);
        assert_eq!(table.on_gradient_ready(p2).unwrap().params(), &[p2, p1]);
    }

    /// Every collective fails.
    struct Unreachable;

    impl CollectiveBackend for Unreachable {
        fn rank(&self) -> usize {
            0
        }
        fn world_size(&self) -> usize {
            1
        }
        fn all_reduce_sum(&self, _tensor: &Tensor) -> Result<Tensor> {
            Err(Error::Collective("peer unreachable".into()))
        }
        fn broadcast(&self, _tensor: &Tensor, _root: usize) -> Result<Tensor> {
            Err(Error::Collective("peer unreachable".into()))
        }
    }

    #[test]
    fn test_failed_collective_leaves_nothing_reduced() {
        let module = Mul::new(Tensor::from_vec(vec![1.0f32], &[1]).unwrap());
        let ddp =
            DistributedDataParallel::new(module, Arc::new(Unreachable), &DistributedEnv::single())
                .unwrap();
        let x = Tensor::from_vec(vec![2.0f32], &[1]).unwrap();
        ddp.forward(&x).unwrap();

        let err = ddp
            .backward(&Tensor::ones(&[1], DType::Float32).unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::Collective(_)));
        assert!(ddp.module().w.grad().is_none());
        let state = ddp.readiness().state(ddp.module().w.id()).unwrap();
        assert!(!state.ready && !state.reduced);
    }

    #[test]
    fn test_second_delivery_in_one_pass_is_rejected() {
        let module = Mul::new(Tensor::from_vec(vec![1.0f32], &[1]).unwrap());
        let ddp = DistributedDataParallel::new(
            module,
            Arc::new(SingleProcessBackend),
            &DistributedEnv::single(),
        )
        .unwrap();
        ddp.forward(&Tensor::from_vec(vec![2.0f32], &[1]).unwrap())
            .unwrap();

        let w = &ddp.module().w;
        w.deliver_grad(Tensor::from_vec(vec![2.0f32], &[1]).unwrap())
            .unwrap();
        let again = w.deliver_grad(Tensor::from_vec(vec![5.0f32], &[1]).unwrap());
        assert!(matches!(again, Err(Error::Runtime(_))));
        assert_eq!(w.grad().unwrap().to_vec::<f32>().unwrap(), vec![2.0]);
        assert_eq!(ddp.all_reduce().batch_count(), 1);
    }

    #[test]
    fn test_mismatched_env_is_config_error() {
        let module = Mul::new(Tensor::from_vec(vec![1.0f32], &[1]).unwrap());
        let env = DistributedEnv {
            rank: 1,
            local_rank: 1,
            world_size: 2,
        };
        let result = DistributedDataParallel::new(module, Arc::new(SingleProcessBackend), &env);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    #[should_panic(expected = "local_rank == rank")]
    fn test_multi_node_topology_panics() {
        let module = Mul::new(Tensor::from_vec(vec![1.0f32], &[1]).unwrap());
        let env = DistributedEnv {
            rank: 1,
            local_rank: 0,
            world_size: 2,
        };
        let _ = DistributedDataParallel::new(module, Arc::new(SingleProcessBackend), &env);
    }
}
