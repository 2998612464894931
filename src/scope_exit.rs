//! Run-on-exit cleanup guards.
//!
//! [`ScopeExit`] holds a zero-argument action and runs it exactly once when the
//! guard is dropped, whether the enclosing scope exits normally or by unwinding.
//! The completion state machine uses this to keep its bookkeeping consistent on
//! every path out of a critical section, including the one where a user
//! continuation panics mid-invocation. The guard is independent of the
//! completion core and can protect any critical section.
//!
//! # Example
//!
//! ```
//! use handoff::on_scope_exit;
//!
//! let mut cleaned = false;
//! {
//!     let _guard = on_scope_exit(|| cleaned = true);
//!     // ... work that may return early or panic ...
//! }
//! assert!(cleaned);
//! ```

/// A guard that runs its action when dropped, unless disarmed first.
///
/// Construct with [`on_scope_exit`]. Moving the guard moves the responsibility
/// with it; calling [`release`](ScopeExit::release) consumes the guard and
/// permanently disarms it. Not cloneable: exactly one owner is ever
/// responsible for the action.
#[must_use = "the action runs when this guard drops; binding it to _ drops it immediately"]
pub struct ScopeExit<F: FnOnce()> {
    action: Option<F>,
}

impl<F: FnOnce()> ScopeExit<F> {
    /// Disarm the guard. The action will never run.
    pub fn release(mut self) {
        self.action = None;
    }
}

impl<F: FnOnce()> Drop for ScopeExit<F> {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

/// Arm `action` to run when the returned guard goes out of scope.
pub fn on_scope_exit<F: FnOnce()>(action: F) -> ScopeExit<F> {
    ScopeExit {
        action: Some(action),
    }
}
