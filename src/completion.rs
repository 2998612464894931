//! The one-shot completion state machine and its producer/consumer handles.
//!
//! # Overview
//!
//! A [`Promise`] and a [`Completion`] share one reference-counted state block.
//! The promise delivers exactly one [`Outcome`]; the completion observes it,
//! either through a registered continuation or by blocking in
//! [`get`](Completion::get). Registration and delivery commute: whichever side
//! arrives second triggers the continuation, and both orders observe the same
//! result.
//!
//! The state machine:
//!
//! ```text
//!                          disable
//!     +----------------------------------------------+
//!     |                                              v
//! +---------+   deliver    +----------+         +----------+
//! | NoValue |------------->| HasValue |         | Disabled |<--+ deliver
//! +---------+              +----------+         +----------+---+ (discarded)
//!     |    |                     |
//!     |    | on_complete / get   | on_complete / get / map / recover
//!     |    | / map / recover     v
//!     |    |              +----------+
//!     |    +------------->| Complete |
//!     |                   +----------+
//!     |                     ^      ^
//!     |                     |      | promise dropped
//!     |         deliver     |      | (abandonment fault)
//!     |   +--------------+  |      |
//!     +-->| HasCallback  |--+------+
//!     |   +--------------+
//!     |
//!     | promise dropped, nothing delivered
//!     v
//! +--------+
//! | Broken |
//! +--------+
//! ```
//!
//! All transitions happen under the block's [`SpinMutex`], held for the whole
//! check-and-mutate, *including* the inline invocation of a continuation. That
//! keeps the machine simple and race-free, at a price the caller must respect:
//!
//! - Continuations must be short-running and must not block.
//! - Continuations must not call back into the same promise/completion pair;
//!   the spin lock is not reentrant and such a call busy-deadlocks. Chaining
//!   into *other* pairs (what [`map`](Completion::map) does internally) is fine.
//! - A panicking continuation does not corrupt the machine: a [`ScopeExit`]
//!   guard flips the phase to `Complete` and clears the slot on the unwind
//!   path. The panic itself propagates to the delivering caller.
//!
//! [`ScopeExit`]: crate::ScopeExit

use std::fmt;
use std::sync::Arc;

use crate::error::{Fault, HandoffError};
use crate::outcome::Outcome;
use crate::scope_exit::on_scope_exit;
use crate::spin_mutex::SpinMutex;

/// The description on the fault delivered when a promise is dropped while a
/// continuation is waiting.
const ABANDONMENT: &str = "promise was dropped before delivering an outcome";

/// Where a completion pair is in its lifecycle.
///
/// `Complete`, `Disabled`, and `Broken` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Neither an outcome nor a continuation has arrived yet.
    NoValue,
    /// The outcome is stored, waiting for the consumer to claim it.
    HasValue,
    /// A continuation is stored, waiting for the producer to deliver.
    HasCallback,
    /// The outcome was delivered and observed; the pair is done.
    Complete,
    /// The consumer opted out; deliveries are silently discarded.
    Disabled,
    /// The promise was dropped without delivering and nobody was waiting.
    Broken,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let str = match self {
            Self::NoValue => "NO_VALUE",
            Self::HasValue => "HAS_VALUE",
            Self::HasCallback => "HAS_CALLBACK",
            Self::Complete => "COMPLETE",
            Self::Disabled => "DISABLED",
            Self::Broken => "BROKEN",
        };
        write!(f, "{}", str)
    }
}

type Continuation<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

/// Fields protected by the block's lock.
///
/// Invariant: `outcome` is populated iff `phase == HasValue`; `continuation` is
/// populated iff `phase == HasCallback`. At most one slot is occupied at a
/// time; both are taken and cleared in exchange for `Complete`.
struct Inner<T: 'static> {
    phase: Phase,
    outcome: Option<Outcome<T>>,
    continuation: Option<Continuation<T>>,
}

/// The state block shared by one [`Promise`] and one [`Completion`].
///
/// Normally allocated implicitly by [`Promise::new`]. Hot paths that want to
/// amortize allocation can pre-build blocks and hand them to
/// [`Promise::from_state`]; a block must be used for at most one pair.
pub struct CompletionState<T: 'static> {
    inner: SpinMutex<Inner<T>>,
}

impl<T: 'static> CompletionState<T> {
    /// Create a fresh block in the `NoValue` phase.
    pub fn new() -> Self {
        Self {
            inner: SpinMutex::new(Inner {
                phase: Phase::NoValue,
                outcome: None,
                continuation: None,
            }),
        }
    }
}

impl<T: 'static> Default for CompletionState<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The producer handle: the exclusive right to deliver exactly one outcome.
///
/// Dropping a promise without delivering moves the pair to `Broken` (nobody
/// waiting) or completes a waiting continuation with an abandonment fault.
pub struct Promise<T: 'static> {
    state: Arc<CompletionState<T>>,
}

impl<T: 'static> Promise<T> {
    /// Create a promise over a freshly allocated state block.
    pub fn new() -> Self {
        Self::from_state(Arc::new(CompletionState::new()))
    }

    /// Create a promise over a pre-allocated block.
    ///
    /// The block must be unused (`NoValue`, nothing stored); reusing a block
    /// from a finished pair makes every operation report `InvalidPhase`.
    pub fn from_state(state: Arc<CompletionState<T>>) -> Self {
        Self { state }
    }

    /// The consumer handle bound to this promise's state block.
    ///
    /// Call this at most once per promise. Nothing prevents a second call, but
    /// the two handles then race for the single outcome and which one observes
    /// it is unspecified.
    pub fn completion(&self) -> Completion<T> {
        Completion {
            state: Arc::clone(&self.state),
        }
    }

    /// The current phase. Do not call from inside a continuation on the same
    /// pair; the lock is not reentrant.
    pub fn phase(&self) -> Phase {
        self.state.inner.lock().phase
    }

    /// Deliver the outcome.
    ///
    /// From `NoValue` the outcome is stored; from `HasCallback` the waiting
    /// continuation runs inline on this thread, under the lock. Delivery to a
    /// `Disabled` pair is discarded without error. Anything else is a second
    /// delivery and fails with
    /// [`InvalidPhase`](HandoffError::InvalidPhase).
    pub fn deliver(&self, outcome: Outcome<T>) -> Result<(), HandoffError> {
        let mut inner = self.state.inner.lock();
        match inner.phase {
            Phase::NoValue => {
                inner.outcome = Some(outcome);
                inner.phase = Phase::HasValue;
                Ok(())
            }
            Phase::HasCallback => {
                let continuation = inner
                    .continuation
                    .take()
                    .expect("HasCallback phase holds a continuation");
                // Flips even if the continuation unwinds.
                let _finish = on_scope_exit(|| inner.phase = Phase::Complete);
                continuation(outcome);
                Ok(())
            }
            Phase::Disabled => {
                drop(inner);
                tracing::trace!("outcome delivered after disable; discarding");
                Ok(())
            }
            phase => Err(HandoffError::InvalidPhase {
                operation: "deliver",
                phase,
            }),
        }
    }

    /// Deliver a success. Equivalent to `deliver(Outcome::success(value))`.
    pub fn set_value(&self, value: T) -> Result<(), HandoffError> {
        self.deliver(Outcome::success(value))
    }

    /// Deliver a failure. Fails with [`EmptyFault`](HandoffError::EmptyFault)
    /// if the fault's description is empty.
    pub fn set_fault(&self, fault: impl Into<Fault>) -> Result<(), HandoffError> {
        self.deliver(Outcome::failure(fault)?)
    }
}

impl<T: 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        let mut inner = self.state.inner.lock();
        match inner.phase {
            Phase::NoValue => {
                inner.phase = Phase::Broken;
                drop(inner);
                tracing::debug!("promise dropped before delivery; completion is broken");
            }
            Phase::HasCallback => {
                let continuation = inner
                    .continuation
                    .take()
                    .expect("HasCallback phase holds a continuation");
                {
                    let _finish = on_scope_exit(|| inner.phase = Phase::Complete);
                    continuation(Outcome::from_fault(Fault::msg(ABANDONMENT)));
                }
                drop(inner);
                tracing::debug!("promise dropped with a continuation waiting; delivered abandonment fault");
            }
            _ => {}
        }
    }
}

impl<T: 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.inner.try_lock() {
            Some(inner) => f.debug_struct("Promise").field("phase", &inner.phase).finish(),
            None => f.debug_struct("Promise").field("phase", &"<locked>").finish(),
        }
    }
}

/// The consumer handle: observe the one outcome, by continuation, by blocking,
/// or by chaining into a new pair.
///
/// Obtained from [`Promise::completion`]. Movable between threads; not
/// cloneable (single consumer).
pub struct Completion<T: 'static> {
    state: Arc<CompletionState<T>>,
}

impl<T: 'static> Completion<T> {
    /// The current phase. Do not call from inside a continuation on the same
    /// pair; the lock is not reentrant.
    pub fn phase(&self) -> Phase {
        self.state.inner.lock().phase
    }

    /// Register `continuation` to run with the outcome.
    ///
    /// From `NoValue` the continuation is stored and runs later on the
    /// delivering thread. From `HasValue` it runs immediately, inline, on this
    /// thread, under the lock. Registering a second continuation, or
    /// registering after the pair finished or was disabled, fails with
    /// [`InvalidPhase`](HandoffError::InvalidPhase); registering on an
    /// abandoned pair fails with [`Abandoned`](HandoffError::Abandoned).
    pub fn on_complete<F>(&self, continuation: F) -> Result<(), HandoffError>
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let mut inner = self.state.inner.lock();
        match inner.phase {
            Phase::NoValue => {
                inner.continuation = Some(Box::new(continuation));
                inner.phase = Phase::HasCallback;
                Ok(())
            }
            Phase::HasValue => {
                let outcome = inner
                    .outcome
                    .take()
                    .expect("HasValue phase holds an outcome");
                let _finish = on_scope_exit(|| inner.phase = Phase::Complete);
                continuation(outcome);
                Ok(())
            }
            Phase::Broken => Err(HandoffError::Abandoned),
            phase => Err(HandoffError::InvalidPhase {
                operation: "on_complete",
                phase,
            }),
        }
    }

    /// Block until the outcome arrives, then return the value or re-raise the
    /// carried fault as [`Faulted`](HandoffError::Faulted).
    ///
    /// This is the crate's only blocking operation: it registers a one-shot
    /// continuation that hands the outcome to a channel and parks on the
    /// receive side. If the promise is dropped instead of delivering, the
    /// abandonment fault arrives the same way.
    pub fn get(self) -> Result<T, HandoffError>
    where
        T: Send,
    {
        let (outcome_tx, outcome_rx) = flume::bounded(1);
        self.on_complete(move |outcome| {
            // The receiver only disappears if this handle was raced by another
            // one; nothing useful to do with the outcome then.
            let _ = outcome_tx.send(outcome);
        })?;
        let outcome = outcome_rx.recv().map_err(|_| HandoffError::Abandoned)?;
        outcome.get().map_err(HandoffError::from)
    }

    /// Opt out of the outcome. One-way and idempotent: any stored continuation
    /// or outcome is dropped, and a later delivery is silently discarded. An
    /// already-running continuation is not interrupted.
    pub fn disable(&self) {
        let mut inner = self.state.inner.lock();
        inner.continuation = None;
        inner.outcome = None;
        inner.phase = Phase::Disabled;
    }

    /// Chain into a new pair whose outcome is this one's, transformed by
    /// [`Outcome::map`] with `action`.
    ///
    /// Works identically whether the outcome is still pending (the splice runs
    /// on the delivering thread) or already present (the returned completion
    /// is populated before this call returns).
    pub fn map<U, F>(self, action: F) -> Result<Completion<U>, HandoffError>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.chain("map", move |outcome| outcome.map(action))
    }

    /// Chain into a new pair whose outcome is this one's, transformed by
    /// [`Outcome::recover`] with `action`. A success passes through untouched;
    /// `action` runs only on a fault.
    pub fn recover<F>(self, action: F) -> Result<Completion<T>, HandoffError>
    where
        T: Send,
        F: FnOnce(Fault) -> T + Send + 'static,
    {
        self.chain("recover", move |outcome| outcome.recover(action))
    }

    /// Splice a fresh promise/completion pair onto this one: deliver this
    /// pair's outcome through `splice` into the new pair, now if the outcome
    /// is already here, otherwise at delivery time.
    fn chain<U, G>(self, operation: &'static str, splice: G) -> Result<Completion<U>, HandoffError>
    where
        U: Send + 'static,
        G: FnOnce(Outcome<T>) -> Outcome<U> + Send + 'static,
    {
        let mut inner = self.state.inner.lock();
        match inner.phase {
            Phase::NoValue => {
                let next = Promise::new();
                let next_completion = next.completion();
                inner.continuation = Some(Box::new(move |outcome| {
                    // Fresh pair, sole deliverer: the only refusal is a
                    // disabled downstream, which deliver absorbs.
                    let _ = next.deliver(splice(outcome));
                }));
                inner.phase = Phase::HasCallback;
                Ok(next_completion)
            }
            Phase::HasValue => {
                let outcome = inner
                    .outcome
                    .take()
                    .expect("HasValue phase holds an outcome");
                let _finish = on_scope_exit(|| inner.phase = Phase::Complete);
                let next = Promise::new();
                let next_completion = next.completion();
                let _ = next.deliver(splice(outcome));
                Ok(next_completion)
            }
            Phase::Broken => Err(HandoffError::Abandoned),
            phase => Err(HandoffError::InvalidPhase { operation, phase }),
        }
    }
}

impl<T: 'static> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.inner.try_lock() {
            Some(inner) => f
                .debug_struct("Completion")
                .field("phase", &inner.phase)
                .finish(),
            None => f
                .debug_struct("Completion")
                .field("phase", &"<locked>")
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_inline_value_walks_phases() {
        let promise = Promise::new();
        promise.set_value(1).unwrap();
        let completion = promise.completion();
        assert_eq!(completion.phase(), Phase::HasValue);
        assert_eq!(completion.get().unwrap(), 1);
        assert_eq!(promise.phase(), Phase::Complete);
    }

    #[test]
    fn test_register_then_deliver_matches_deliver_then_register() {
        let seen = |promise: &Promise<i32>, completion: &Completion<i32>, register_first: bool| {
            let slot = Arc::new(SpinMutex::new(None));
            let sink = Arc::clone(&slot);
            let register =
                |c: &Completion<i32>| c.on_complete(move |o| *sink.lock() = o.value().copied());
            if register_first {
                register(completion).unwrap();
                promise.set_value(7).unwrap();
            } else {
                promise.set_value(7).unwrap();
                register(completion).unwrap();
            }
            let got = *slot.lock();
            got
        };

        let a = Promise::new();
        let ac = a.completion();
        let b = Promise::new();
        let bc = b.completion();
        assert_eq!(seen(&a, &ac, true), Some(7));
        assert_eq!(seen(&b, &bc, false), Some(7));
        assert_eq!(a.phase(), Phase::Complete);
        assert_eq!(b.phase(), Phase::Complete);
    }

    #[test]
    fn test_map_chain_twenty_doublings() {
        let promise = Promise::new();
        let mut chained = promise.completion();
        for _ in 0..20 {
            chained = chained.map(|x: u32| x * 2).unwrap();
        }
        promise.set_value(1).unwrap();
        assert_eq!(chained.get().unwrap(), 1 << 20);
    }

    #[test]
    fn test_chain_after_value_is_synchronous() {
        let promise = Promise::new();
        promise.set_value(2).unwrap();
        let mapped = promise.completion().map(|x: i32| x + 1).unwrap();
        // The new pair is populated before map returns.
        assert_eq!(mapped.phase(), Phase::HasValue);
        assert_eq!(promise.phase(), Phase::Complete);
        assert_eq!(mapped.get().unwrap(), 3);
    }

    #[test]
    fn test_recover_skipped_on_success_chain() {
        let ran = Arc::new(AtomicBool::new(false));
        let witness = Arc::clone(&ran);

        let promise = Promise::new();
        let chained = promise
            .completion()
            .map(|x: i32| x * 2)
            .unwrap()
            .recover(move |_| {
                witness.store(true, Ordering::SeqCst);
                -1
            })
            .unwrap();
        promise.set_value(21).unwrap();
        assert_eq!(chained.get().unwrap(), 42);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_recover_feeds_following_map() {
        let runs = Arc::new(AtomicUsize::new(0));
        let witness = Arc::clone(&runs);

        let promise = Promise::new();
        let chained = promise
            .completion()
            .recover(move |fault| {
                witness.fetch_add(1, Ordering::SeqCst);
                assert_eq!(fault.message(), "upstream refused");
                5
            })
            .unwrap()
            .map(|x: i32| x * 2)
            .unwrap();
        promise.set_fault("upstream refused").unwrap();
        assert_eq!(chained.get().unwrap(), 10);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fault_skips_map_chain() {
        let promise = Promise::new();
        let chained = promise
            .completion()
            .map(|_: i32| -> i32 { panic!("map ran on a fault") })
            .unwrap();
        promise.set_fault("boom").unwrap();
        match chained.get() {
            Err(HandoffError::Faulted(fault)) => assert_eq!(fault.message(), "boom"),
            other => panic!("expected a carried fault, got {other:?}"),
        }
    }

    #[test]
    fn test_double_delivery_rejected() {
        let promise = Promise::new();
        promise.set_value(1).unwrap();
        assert!(matches!(
            promise.set_value(2),
            Err(HandoffError::InvalidPhase {
                operation: "deliver",
                phase: Phase::HasValue,
            })
        ));

        // Also after the outcome was observed.
        promise.completion().get().unwrap();
        assert!(matches!(
            promise.set_value(3),
            Err(HandoffError::InvalidPhase {
                phase: Phase::Complete,
                ..
            })
        ));
    }

    #[test]
    fn test_delivery_to_disabled_is_absorbed() {
        let hit = Arc::new(AtomicBool::new(false));
        let witness = Arc::clone(&hit);

        let promise = Promise::new();
        let completion = promise.completion();
        completion
            .on_complete(move |_| witness.store(true, Ordering::SeqCst))
            .unwrap();
        completion.disable();

        // Absorbed, not an error, and the continuation never runs.
        promise.set_value(()).unwrap();
        promise.set_value(()).unwrap();
        assert!(!hit.load(Ordering::SeqCst));
        assert_eq!(completion.phase(), Phase::Disabled);
    }

    #[test]
    fn test_disable_is_idempotent() {
        let promise: Promise<i32> = Promise::new();
        let completion = promise.completion();
        completion.disable();
        completion.disable();
        assert_eq!(completion.phase(), Phase::Disabled);
    }

    #[test]
    fn test_second_registration_rejected() {
        let promise: Promise<i32> = Promise::new();
        let completion = promise.completion();
        completion.on_complete(|_| {}).unwrap();
        assert!(matches!(
            completion.on_complete(|_| {}),
            Err(HandoffError::InvalidPhase {
                operation: "on_complete",
                phase: Phase::HasCallback,
            })
        ));
    }

    #[test]
    fn test_blocked_get_released_by_other_thread() {
        let promise = Promise::new();
        let completion = promise.completion();
        let started = Arc::new(AtomicBool::new(false));
        let starting = Arc::clone(&started);

        let waiter = thread::spawn(move || {
            starting.store(true, Ordering::SeqCst);
            completion.get()
        });
        while !started.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }

        promise.set_value(String::from("delivered")).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), "delivered");
    }

    #[test]
    fn test_broken_rejects_late_registration() {
        let promise: Promise<i32> = Promise::new();
        let completion = promise.completion();
        drop(promise);
        assert_eq!(completion.phase(), Phase::Broken);
        assert!(matches!(
            completion.on_complete(|_| {}),
            Err(HandoffError::Abandoned)
        ));
        assert!(matches!(
            completion.map(|x| x + 1),
            Err(HandoffError::Abandoned)
        ));
    }

    #[test]
    fn test_drop_with_callback_delivers_abandonment_fault() {
        let message = Arc::new(SpinMutex::new(None));
        let sink = Arc::clone(&message);

        let promise: Promise<i32> = Promise::new();
        let completion = promise.completion();
        completion
            .on_complete(move |outcome| {
                *sink.lock() = outcome.fault().map(|fault| fault.message().to_owned());
            })
            .unwrap();
        drop(promise);

        assert_eq!(completion.phase(), Phase::Complete);
        assert_eq!(message.lock().as_deref(), Some(ABANDONMENT));
    }

    #[test]
    fn test_abandoned_promise_releases_blocked_get() {
        let promise: Promise<i32> = Promise::new();
        let completion = promise.completion();

        let waiter = thread::spawn(move || completion.get());
        // Wait until get() has parked its continuation, so the drop below
        // exercises the callback-waiting path rather than Broken.
        while promise.phase() != Phase::HasCallback {
            thread::sleep(Duration::from_millis(1));
        }

        drop(promise);
        match waiter.join().unwrap() {
            Err(HandoffError::Faulted(fault)) => assert_eq!(fault.message(), ABANDONMENT),
            other => panic!("expected an abandonment fault, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_fault_rejected_before_delivery() {
        let promise: Promise<i32> = Promise::new();
        assert!(matches!(
            promise.set_fault(""),
            Err(HandoffError::EmptyFault)
        ));
        // The rejection happened at construction; nothing was delivered.
        assert_eq!(promise.phase(), Phase::NoValue);
    }

    #[test]
    fn test_panicking_continuation_still_completes() {
        let promise: Promise<i32> = Promise::new();
        let completion = promise.completion();
        completion
            .on_complete(|_| panic!("continuation exploded"))
            .unwrap();

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            promise.set_value(1)
        }));
        assert!(unwound.is_err());

        // The machine stayed consistent: the phase flipped and the slot was
        // cleared, so a second delivery is the usual contract violation.
        assert_eq!(promise.phase(), Phase::Complete);
        assert!(matches!(
            promise.set_value(2),
            Err(HandoffError::InvalidPhase {
                phase: Phase::Complete,
                ..
            })
        ));
    }

    #[test]
    fn test_preallocated_state_block() {
        let state = Arc::new(CompletionState::new());
        let promise = Promise::from_state(Arc::clone(&state));
        let completion = promise.completion();
        promise.set_value(11).unwrap();
        assert_eq!(completion.get().unwrap(), 11);
    }

    #[test]
    fn test_void_payload_round_trip() {
        let promise: Promise<()> = Promise::new();
        let completion = promise.completion();
        promise.set_value(()).unwrap();
        completion.get().unwrap();
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::NoValue.to_string(), "NO_VALUE");
        assert_eq!(Phase::HasCallback.to_string(), "HAS_CALLBACK");
        assert_eq!(Phase::Broken.to_string(), "BROKEN");
    }
}
