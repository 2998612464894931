//! A busy-wait mutual-exclusion primitive.
//!
//! # Overview
//!
//! [`SpinMutex`] protects its data by spinning on an atomic flag instead of
//! parking the thread through the OS. When the critical section is a handful of
//! field writes (as in the completion state machine, where a transition is one
//! phase write and one slot move) and contention is low, the syscall overhead of
//! a blocking mutex dominates the work it protects; spinning trades CPU for
//! latency in that regime.
//!
//! Acquisition comes in four flavors:
//!
//! - [`try_lock`](SpinMutex::try_lock): a single compare-and-swap attempt.
//! - [`try_lock_until`](SpinMutex::try_lock_until) /
//!   [`try_lock_for`](SpinMutex::try_lock_for): bounded spinning against a
//!   monotonic deadline.
//! - [`try_lock_spins`](SpinMutex::try_lock_spins): bounded by attempt count.
//! - [`lock`](SpinMutex::lock): unbounded spinning.
//!
//! Access to the data goes through the RAII [`SpinGuard`]; dropping the guard
//! releases the lock unconditionally, with no ownership check.
//!
//! Hold the lock only for short critical sections. Never block or park while
//! holding it.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use coarsetime::{Duration, Instant};

/// A mutex that spins on an [`AtomicBool`] instead of relying on OS blocking.
pub struct SpinMutex<T: ?Sized> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: the atomic flag guarantees at most one live guard, so sharing the
// mutex across threads hands out exclusive access to T one thread at a time.
unsafe impl<T: ?Sized + Send> Send for SpinMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    /// Create an unlocked mutex owning `value`.
    pub fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Consume the mutex and return the protected value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ?Sized> SpinMutex<T> {
    /// Attempt to acquire the lock with a single compare-and-swap.
    ///
    /// On success there is a sequentially-consistent barrier; on failure there
    /// is no memory-ordering guarantee.
    pub fn try_lock(&self) -> Option<SpinGuard<'_, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinGuard { mutex: self })
        } else {
            None
        }
    }

    /// Spin until the lock is acquired or the monotonic clock passes
    /// `deadline`.
    ///
    /// A deadline already in the past still attempts the lock once, so the lock
    /// stays obtainable on machines where the clock outruns short spin windows.
    pub fn try_lock_until(&self, deadline: Instant) -> Option<SpinGuard<'_, T>> {
        loop {
            if let Some(guard) = self.try_lock() {
                return Some(guard);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::hint::spin_loop();
        }
    }

    /// Spin for at most `duration`, measured on the monotonic clock.
    pub fn try_lock_for(&self, duration: Duration) -> Option<SpinGuard<'_, T>> {
        self.try_lock_until(Instant::now() + duration)
    }

    /// Attempt the lock at most `spins` times.
    pub fn try_lock_spins(&self, mut spins: usize) -> Option<SpinGuard<'_, T>> {
        while spins > 0 {
            spins -= 1;
            if let Some(guard) = self.try_lock() {
                return Some(guard);
            }
            std::hint::spin_loop();
        }
        None
    }

    /// Spin unconditionally until the lock is acquired.
    pub fn lock(&self) -> SpinGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            std::hint::spin_loop();
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("SpinMutex").field("value", &&*guard).finish(),
            None => f.debug_struct("SpinMutex").field("value", &"<locked>").finish(),
        }
    }
}

/// RAII guard granting exclusive access to the data of a [`SpinMutex`].
///
/// Dropping the guard unconditionally clears the locked flag with a
/// sequentially-consistent store.
pub struct SpinGuard<'a, T: ?Sized> {
    mutex: &'a SpinMutex<T>,
}

impl<T: ?Sized> Deref for SpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard exists, so this thread holds the lock exclusively.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard exists, so this thread holds the lock exclusively.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T: ?Sized> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Ordering::SeqCst);
    }
}
