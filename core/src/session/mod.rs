//! # Sessions
//!
//! A [`Session`] ties together the three things every interface call needs: the runtime it
//! dispatches to, the resolver it looks op metadata up in, and the cache of blobs it has
//! already materialized.
//!
//! Sessions are ordinary values. Pass them around explicitly, or enter one with
//! [`context::enter`] to make it the current session of the thread for the free functions
//! in [`crate::interface`].
//!
//! ## Blob cache
//!
//! Each op name is materialized at most once per session. [`Session::find_or_create_blob`]
//! checks the cache, takes the session's build lock, checks again, and only then runs the
//! factory. Two threads racing on a new name therefore produce one build.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::blob::RemoteBlob;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::interface::InterfaceOps;
use crate::op_attr::{InterfaceOpRegistry, OpAttributeResolver};
use crate::runtime::{LocalRuntime, Runtime, RuntimeMode};

pub mod context;

pub use context::{SessionGuard, current_session, enter};

pub struct Session {
    mode: RuntimeMode,
    runtime: Arc<dyn Runtime>,
    resolver: Arc<dyn OpAttributeResolver>,
    blobs: Mutex<HashMap<String, Arc<RemoteBlob>>>,
    build_lock: Mutex<()>,
}

impl Session {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        resolver: Arc<dyn OpAttributeResolver>,
        mode: RuntimeMode,
    ) -> Self {
        Self {
            mode,
            runtime,
            resolver,
            blobs: Mutex::new(HashMap::new()),
            build_lock: Mutex::new(()),
        }
    }

    /// Builds a session over a fresh [`LocalRuntime`] with the config's interface ops.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let runtime = Arc::new(LocalRuntime::new()?);
        let resolver = Arc::new(InterfaceOpRegistry::from_decls(&config.interface_ops));
        tracing::info!(
            mode = ?config.mode,
            interface_ops = config.interface_ops.len(),
            "session created"
        );
        Ok(Self::new(runtime, resolver, config.mode))
    }

    pub fn mode(&self) -> RuntimeMode {
        self.mode
    }

    pub fn runtime(&self) -> &dyn Runtime {
        self.runtime.as_ref()
    }

    pub fn resolver(&self) -> &dyn OpAttributeResolver {
        self.resolver.as_ref()
    }

    /// Syncs with the runtime when running in [`RuntimeMode::Normal`]; no-op otherwise.
    pub fn sync_if_normal(&self) -> Result<()> {
        if self.mode == RuntimeMode::Normal {
            self.runtime.sync()
        } else {
            Ok(())
        }
    }

    pub fn cached_blob(&self, op_name: &str) -> Option<Arc<RemoteBlob>> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op_name)
            .cloned()
    }

    /// Returns the cached blob for `op_name`, or runs `create` and caches its result.
    ///
    /// A failed `create` caches nothing.
    pub fn find_or_create_blob<F>(&self, op_name: &str, create: F) -> Result<Arc<RemoteBlob>>
    where
        F: FnOnce() -> Result<RemoteBlob>,
    {
        if let Some(blob) = self.cached_blob(op_name) {
            tracing::trace!(%op_name, "blob cache hit");
            return Ok(blob);
        }
        let _building = self
            .build_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(blob) = self.cached_blob(op_name) {
            return Ok(blob);
        }
        let blob = Arc::new(create()?);
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op_name.to_string(), blob.clone());
        Ok(blob)
    }

    pub fn interface(&self) -> InterfaceOps<'_> {
        InterfaceOps::new(self)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self
            .blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field("cached_blobs", &cached)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobDesc, RemoteBlob};
    use crate::error::Error;
    use crate::op_attr::{LogicalBlobId, OpAttribute};
    use crate::placement::ParallelConf;
    use crate::runtime::logical_run_with_yield;
    use crate::tensor::DType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn session(mode: RuntimeMode) -> Session {
        let registry = InterfaceOpRegistry::new();
        registry.register(
            "job",
            OpAttribute::interface("x").with_output_desc(BlobDesc::new(&[1], DType::Float32)),
            ParallelConf::new("cpu", &["0:0"]),
        );
        Session::new(
            Arc::new(LocalRuntime::new().unwrap()),
            Arc::new(registry),
            mode,
        )
    }

    fn make_blob(session: &Session) -> Result<RemoteBlob> {
        let attr = session.resolver().op_attribute_for("x")?;
        let conf = session.resolver().parallel_conf_for("x")?.into_cfg();
        let mut blobs = logical_run_with_yield(session.runtime(), 1, move |b, y| {
            let obj = b.make_lazy_ref_blob_object("x", &attr, &conf)?;
            y.emit(RemoteBlob::wrap(LogicalBlobId::new("x", "out"), obj, "job"));
            Ok(())
        })?;
        Ok(blobs.remove(0))
    }

    #[test]
    fn test_sync_only_in_normal_mode() {
        let normal = session(RuntimeMode::Normal);
        normal.sync_if_normal().unwrap();
        assert_eq!(normal.runtime().stats().syncs, 1);

        let global = session(RuntimeMode::Global);
        global.sync_if_normal().unwrap();
        assert_eq!(global.runtime().stats().syncs, 0);
    }

    #[test]
    fn test_failed_factory_caches_nothing() {
        let s = session(RuntimeMode::Normal);
        let err = s
            .find_or_create_blob("x", || Err(Error::Runtime("nope".into())))
            .unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
        assert!(s.cached_blob("x").is_none());
    }

    #[test]
    fn test_concurrent_first_resolution_builds_once() {
        let s = Arc::new(session(RuntimeMode::Normal));
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = s.clone();
                let calls = calls.clone();
                thread::spawn(move || {
                    s.find_or_create_blob("x", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        make_blob(&s)
                    })
                    .unwrap()
                })
            })
            .collect();
        let blobs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(blobs.iter().all(|b| Arc::ptr_eq(b, &blobs[0])));
        assert_eq!(s.runtime().stats().lazy_ref_blobs, 1);
    }
}
