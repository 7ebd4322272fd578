//! The thread's current session.
//!
//! Entering a session pushes it on a thread-local stack; dropping the returned guard pops
//! it. Nested scopes restore the outer session on exit.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use super::Session;
use crate::error::{Error, Result};

thread_local! {
    static STACK: RefCell<Vec<Arc<Session>>> = const { RefCell::new(Vec::new()) };
}

/// Keeps a session current until dropped. Bound to the thread that created it.
#[must_use = "the session stops being current when the guard is dropped"]
#[derive(Debug)]
pub struct SessionGuard {
    _not_send: PhantomData<*const ()>,
}

/// Makes `session` the current session of this thread.
pub fn enter(session: Arc<Session>) -> SessionGuard {
    STACK.with(|stack| stack.borrow_mut().push(session));
    SessionGuard {
        _not_send: PhantomData,
    }
}

/// The innermost entered session.
///
/// # Errors
///
/// Returns [`Error::NoDefaultSession`] outside any [`enter`] scope.
pub fn current_session() -> Result<Arc<Session>> {
    STACK
        .with(|stack| stack.borrow().last().cloned())
        .ok_or(Error::NoDefaultSession)
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op_attr::InterfaceOpRegistry;
    use crate::runtime::{LocalRuntime, RuntimeMode};

    fn session() -> Arc<Session> {
        Arc::new(Session::new(
            Arc::new(LocalRuntime::new().unwrap()),
            Arc::new(InterfaceOpRegistry::new()),
            RuntimeMode::Normal,
        ))
    }

    #[test]
    fn test_no_session_outside_scope() {
        assert!(matches!(current_session(), Err(Error::NoDefaultSession)));
    }

    #[test]
    fn test_nested_scopes() {
        let outer = session();
        let inner = session();
        let _outer_guard = enter(outer.clone());
        assert!(Arc::ptr_eq(&current_session().unwrap(), &outer));
        {
            let _inner_guard = enter(inner.clone());
            assert!(Arc::ptr_eq(&current_session().unwrap(), &inner));
        }
        assert!(Arc::ptr_eq(&current_session().unwrap(), &outer));
    }

    #[test]
    fn test_sessions_are_per_thread() {
        let _guard = enter(session());
        let seen = std::thread::spawn(|| current_session().is_ok()).join().unwrap();
        assert!(!seen);
    }
}
