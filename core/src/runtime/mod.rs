//! # Runtime bridge
//!
//! The eager layer talks to the execution engine through one narrow seam: it hands the
//! engine a *build* closure, the engine runs it against an [`InstructionsBuilder`], and the
//! caller gets a [`Pending`] back.
//!
//! ## Dispatch modes
//!
//! - [`logical_run`]: submit and block until the build has run.
//! - [`logical_run_with_yield`]: the build receives a [`Yielder`] and hands values back
//!   through it. The caller blocks until the build finishes and then expects exactly `n`
//!   yielded values.
//!
//! Builds submitted to one runtime run one at a time, in submission order. There is no
//! cancellation: once submitted, a build runs to completion, and its error (if any) comes
//! back through the `Pending`.
//!
//! A build must not dispatch to the runtime that is running it and wait on the result.
//! The worker is busy with the outer build, so the inner one would never start.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod builder;
pub mod local;
pub mod pending;

pub use builder::InstructionsBuilder;
pub use local::LocalRuntime;
pub use pending::{Completer, Pending, Yielder};

/// A unit of work for the runtime.
pub type BuildFn = Box<dyn for<'a> FnOnce(&mut InstructionsBuilder<'a>) -> Result<()> + Send>;

/// Execution mode of a session.
///
/// Sessions in `Normal` mode sync with the runtime before every blob resolution, feed
/// and fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    #[default]
    Normal,
    Global,
    Device,
}

/// Counters a runtime keeps about the work it has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub builds: u64,
    pub syncs: u64,
    pub lazy_ref_blobs: u64,
    pub feeds: u64,
    pub reads: u64,
}

/// The engine a session dispatches to.
pub trait Runtime: Send + Sync {
    /// Queues `build`. Builds run in submission order.
    fn submit(&self, build: BuildFn) -> Pending<()>;

    /// Blocks until every build submitted so far has run.
    fn sync(&self) -> Result<()>;

    fn stats(&self) -> RuntimeStats;
}

/// Runs `build` and waits for it.
pub fn logical_run<F>(runtime: &dyn Runtime, build: F) -> Result<()>
where
    F: for<'a> FnOnce(&mut InstructionsBuilder<'a>) -> Result<()> + Send + 'static,
{
    runtime.submit(Box::new(build)).wait()
}

/// Runs `build` with a [`Yielder`] and returns the `n` values it yielded.
///
/// # Errors
///
/// Propagates the build's error. A build that yields anything other than exactly `n`
/// values is a runtime error.
pub fn logical_run_with_yield<T, F>(runtime: &dyn Runtime, n: usize, build: F) -> Result<Vec<T>>
where
    T: Send + 'static,
    F: for<'a> FnOnce(&mut InstructionsBuilder<'a>, Yielder<T>) -> Result<()> + Send + 'static,
{
    let (yielder, values) = Yielder::channel();
    runtime
        .submit(Box::new(move |builder| build(builder, yielder)))
        .wait()?;
    // The build and its yielder are gone, so every value is already queued.
    let values: Vec<T> = values.try_iter().collect();
    if values.len() != n {
        return Err(Error::Runtime(format!(
            "expected {n} yielded value(s), got {}",
            values.len()
        )));
    }
    Ok(values)
}
