//! The value-or-failure payload delivered through a completion.
//!
//! # Overview
//!
//! [`Outcome<T>`] holds exactly one of a success value or a [`Fault`]. It is the
//! payload type the producer hands to [`Promise::deliver`](crate::Promise) and
//! the argument every registered continuation receives. The combinators compose
//! the way the completion chain does:
//!
//! - [`map`](Outcome::map) transforms a success and propagates a failure
//!   untouched, never invoking the function on the failure path.
//! - [`flat_map`](Outcome::flat_map) is `map` for functions that already return
//!   an `Outcome`; the result is that outcome, not a nested one.
//! - [`recover`](Outcome::recover) is the mirror image: it only runs on a
//!   failure and turns the fault back into a success value.
//! - [`capture`](Outcome::capture) runs a fallible computation and folds its
//!   error into the failure side.
//!
//! An `Outcome` is constructed through the [`success`](Outcome::success) and
//! [`failure`](Outcome::failure) factories; the failure factory rejects faults
//! with an empty description, so a failure outcome always has something to say.
//! For a payload-free outcome use `Outcome<()>`.

use crate::error::{Fault, HandoffError};

enum Repr<T> {
    Success(T),
    Failure(Fault),
}

/// A value of type `T` or a carried [`Fault`]; exactly one is present.
///
/// Immutable once constructed, except by move: the transforming operations take
/// `self` and hand ownership to the result.
pub struct Outcome<T> {
    repr: Repr<T>,
}

impl<T> Outcome<T> {
    /// Create a successful outcome holding `value`.
    pub fn success(value: T) -> Self {
        Self {
            repr: Repr::Success(value),
        }
    }

    /// Create a failed outcome carrying `fault`.
    ///
    /// Fails with [`HandoffError::EmptyFault`] when the fault's description is
    /// empty. The check happens here, at construction, never later.
    pub fn failure(fault: impl Into<Fault>) -> Result<Self, HandoffError> {
        let fault = fault.into();
        if fault.is_empty() {
            return Err(HandoffError::EmptyFault);
        }
        Ok(Self::from_fault(fault))
    }

    /// Internal constructor for faults that already passed validation.
    pub(crate) fn from_fault(fault: Fault) -> Self {
        Self {
            repr: Repr::Failure(fault),
        }
    }

    /// Run `action`; its `Ok` becomes a success and its `Err` a carried fault.
    pub fn capture<E, F>(action: F) -> Self
    where
        E: Into<Fault>,
        F: FnOnce() -> Result<T, E>,
    {
        Self::from_result(action())
    }

    /// Fold a plain `Result` into an outcome.
    pub fn from_result<E: Into<Fault>>(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(err) => Self::from_fault(err.into()),
        }
    }

    /// Whether this outcome holds a value. If `true`, [`get`](Outcome::get)
    /// yields the value.
    pub fn is_success(&self) -> bool {
        matches!(self.repr, Repr::Success(_))
    }

    /// Whether this outcome holds a fault. If `true`, [`get`](Outcome::get)
    /// re-raises it.
    pub fn is_failure(&self) -> bool {
        matches!(self.repr, Repr::Failure(_))
    }

    /// Borrow the success value, if any.
    pub fn value(&self) -> Option<&T> {
        match &self.repr {
            Repr::Success(value) => Some(value),
            Repr::Failure(_) => None,
        }
    }

    /// Borrow the carried fault, if any.
    pub fn fault(&self) -> Option<&Fault> {
        match &self.repr {
            Repr::Success(_) => None,
            Repr::Failure(fault) => Some(fault),
        }
    }

    /// Yield the value, or re-raise the carried fault.
    pub fn get(self) -> Result<T, Fault> {
        self.into_result()
    }

    /// The inverse of [`from_result`](Outcome::from_result).
    pub fn into_result(self) -> Result<T, Fault> {
        match self.repr {
            Repr::Success(value) => Ok(value),
            Repr::Failure(fault) => Err(fault),
        }
    }

    /// Apply `action` to a success value; propagate a failure's fault into the
    /// new outcome without invoking `action`.
    pub fn map<U, F>(self, action: F) -> Outcome<U>
    where
        F: FnOnce(T) -> U,
    {
        match self.repr {
            Repr::Success(value) => Outcome::success(action(value)),
            Repr::Failure(fault) => Outcome::from_fault(fault),
        }
    }

    /// Like [`map`](Outcome::map), but `action` returns an `Outcome<U>`
    /// directly and the result is that outcome, flattened one level.
    ///
    /// The requirement that the function return an `Outcome` is part of the
    /// signature; a function with its own failure mode expresses it through the
    /// outcome it returns.
    pub fn flat_map<U, F>(self, action: F) -> Outcome<U>
    where
        F: FnOnce(T) -> Outcome<U>,
    {
        match self.repr {
            Repr::Success(value) => action(value),
            Repr::Failure(fault) => Outcome::from_fault(fault),
        }
    }

    /// Pass a success through unchanged; on failure, hand the fault to
    /// `action` and success-wrap its result.
    pub fn recover<F>(self, action: F) -> Outcome<T>
    where
        F: FnOnce(Fault) -> T,
    {
        match self.repr {
            Repr::Success(_) => self,
            Repr::Failure(fault) => Outcome::success(action(fault)),
        }
    }
}

impl<T> From<Result<T, Fault>> for Outcome<T> {
    fn from(result: Result<T, Fault>) -> Self {
        Self::from_result(result)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.repr {
            Repr::Success(value) => f.debug_tuple("Success").field(value).finish(),
            Repr::Failure(fault) => f.debug_tuple("Failure").field(fault).finish(),
        }
    }
}
