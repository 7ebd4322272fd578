use crossbeam::channel::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};

use super::builder::BlobStore;
use super::{BuildFn, Completer, InstructionsBuilder, Pending, Runtime, RuntimeStats};

enum Job {
    Build(BuildFn, Completer<()>),
    Sync(Completer<()>),
}

/// In-process runtime: one worker thread draining a FIFO queue.
///
/// The worker owns every blob object and value. Dropping the runtime closes the queue,
/// lets the worker finish what was already submitted, and joins it.
pub struct LocalRuntime {
    tx: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<Mutex<RuntimeStats>>,
}

impl LocalRuntime {
    pub fn new() -> Result<Self> {
        let (tx, rx) = channel::unbounded();
        let stats = Arc::new(Mutex::new(RuntimeStats::default()));
        let published = stats.clone();
        let worker = thread::Builder::new()
            .name("oneflow-eager-runtime".into())
            .spawn(move || run_worker(rx, published))?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            stats,
        })
    }

    fn send(&self, job: Job) -> std::result::Result<(), Job> {
        match &self.tx {
            Some(tx) => tx.send(job).map_err(|e| e.into_inner()),
            None => Err(job),
        }
    }
}

fn shut_down() -> Error {
    Error::Runtime("runtime has shut down".into())
}

fn run_worker(rx: Receiver<Job>, published: Arc<Mutex<RuntimeStats>>) {
    let mut store = BlobStore::default();
    let mut stats = RuntimeStats::default();
    for job in rx.iter() {
        match job {
            Job::Build(build, completer) => {
                stats.builds += 1;
                let result = build(&mut InstructionsBuilder::new(&mut store, &mut stats));
                if let Err(e) = &result {
                    tracing::debug!(error = %e, "build failed");
                }
                *published.lock().unwrap_or_else(PoisonError::into_inner) = stats;
                completer.complete(result);
            }
            Job::Sync(completer) => {
                stats.syncs += 1;
                *published.lock().unwrap_or_else(PoisonError::into_inner) = stats;
                completer.complete(Ok(()));
            }
        }
    }
    tracing::debug!("runtime worker exiting");
}

impl Runtime for LocalRuntime {
    fn submit(&self, build: BuildFn) -> Pending<()> {
        let (completer, pending) = Pending::pair();
        match self.send(Job::Build(build, completer)) {
            Ok(()) => pending,
            Err(_) => Pending::ready(Err(shut_down())),
        }
    }

    fn sync(&self) -> Result<()> {
        let (completer, pending) = Pending::pair();
        match self.send(Job::Sync(completer)) {
            Ok(()) => pending.wait(),
            Err(_) => Err(shut_down()),
        }
    }

    fn stats(&self) -> RuntimeStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LocalRuntime {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("runtime worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fifo_order() {
        let rt = LocalRuntime::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pendings: Vec<_> = (0..16)
            .map(|i| {
                let seen = seen.clone();
                rt.submit(Box::new(move |_| {
                    seen.lock().unwrap().push(i);
                    Ok(())
                }))
            })
            .collect();
        for p in pendings {
            p.wait().unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_sync_waits_for_queue() {
        let rt = LocalRuntime::new().unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let done = done.clone();
            let _ = rt.submit(Box::new(move |_| {
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        rt.sync().unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 4);
        let stats = rt.stats();
        assert_eq!(stats.builds, 4);
        assert_eq!(stats.syncs, 1);
    }

    #[test]
    fn test_panicking_build_reports_error() {
        let rt = LocalRuntime::new().unwrap();
        let result = rt.submit(Box::new(|_| panic!("bad build"))).wait();
        assert!(matches!(result, Err(Error::Runtime(_))));
        // The worker is gone; later work fails instead of hanging.
        assert!(rt.sync().is_err());
    }
}
