//! Active-target stack.
//!
//! Tracks which watcher is currently evaluating on this thread. When a slot
//! is read, its dep consults the stack top to decide which watcher the read
//! subscribes. The stack (rather than a single flag) supports re-entrant
//! evaluation: a computed watcher evaluated while a render watcher is active
//! pushes on top, and the render watcher is restored when it finishes.
//!
//! Push and pop are paired through an RAII guard so the stack stays balanced
//! on every exit path, including panics inside an evaluator.

use std::cell::RefCell;
use std::marker::PhantomData;

use super::watcher::{Watcher, WatcherId};

thread_local! {
    static TARGET_STACK: RefCell<Vec<Watcher>> = const { RefCell::new(Vec::new()) };
}

/// Accessors for the per-thread evaluation stack.
pub struct TargetStack;

impl TargetStack {
    /// Push a watcher as the active target.
    ///
    /// The watcher stays active until the returned guard is dropped.
    pub fn push(watcher: &Watcher) -> TargetGuard {
        TARGET_STACK.with(|stack| stack.borrow_mut().push(watcher.clone()));
        TargetGuard {
            id: watcher.id(),
            _not_send: PhantomData,
        }
    }

    /// Get the currently evaluating watcher, if any.
    pub fn current() -> Option<Watcher> {
        TARGET_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Current re-entrant evaluation depth.
    pub fn depth() -> usize {
        TARGET_STACK.with(|stack| stack.borrow().len())
    }
}

/// Guard that pops the target stack when dropped.
pub struct TargetGuard {
    id: WatcherId,
    /// Guards must drop on the thread that pushed.
    _not_send: PhantomData<*const ()>,
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        TARGET_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(watcher) = popped {
                debug_assert_eq!(
                    watcher.id(),
                    self.id,
                    "target stack mismatch: expected {:?}, got {:?}",
                    self.id,
                    watcher.id()
                );
            }
        });
    }
}
