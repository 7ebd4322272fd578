use crossbeam::channel::{self, Receiver, Sender, TryRecvError};

use crate::error::{Error, Result};

/// The eventual result of one submitted build.
///
/// The runtime completes it exactly once. `wait` blocks the calling thread until then.
#[derive(Debug)]
#[must_use = "a submitted build only reports errors through its Pending"]
pub struct Pending<T> {
    rx: Receiver<Result<T>>,
}

/// The completing half of a [`Pending`].
#[derive(Debug)]
pub struct Completer<T> {
    tx: Sender<Result<T>>,
}

impl<T> Pending<T> {
    pub fn pair() -> (Completer<T>, Pending<T>) {
        let (tx, rx) = channel::bounded(1);
        (Completer { tx }, Pending { rx })
    }

    /// An already-completed result.
    pub fn ready(result: Result<T>) -> Self {
        let (completer, pending) = Self::pair();
        completer.complete(result);
        pending
    }

    /// Blocks until the build finishes.
    ///
    /// # Errors
    ///
    /// Returns the build's own error, or `Error::Runtime` if the runtime dropped the build
    /// without completing it.
    pub fn wait(self) -> Result<T> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(Error::Runtime("build dropped before completion".into())))
    }

    /// Returns the result if it is already there.
    pub fn try_wait(&self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                Some(Err(Error::Runtime("build dropped before completion".into())))
            }
        }
    }
}

impl<T> Completer<T> {
    pub fn complete(self, result: Result<T>) {
        // The waiter may have given up; nothing to report to.
        let _ = self.tx.send(result);
    }
}

/// Callback a yielding build uses to hand values back to its caller.
#[derive(Debug)]
pub struct Yielder<T> {
    tx: Sender<T>,
}

impl<T> Clone for Yielder<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Yielder<T> {
    pub fn channel() -> (Yielder<T>, Receiver<T>) {
        let (tx, rx) = channel::unbounded();
        (Yielder { tx }, rx)
    }

    pub fn emit(&self, value: T) {
        let _ = self.tx.send(value);
    }
}
