//! Error types for the handoff crate.
//!
//! Two disjoint channels exist and never mix:
//!
//! - [`Fault`] is the *carried* failure: the domain error a producer delivers as
//!   the failure side of an [`Outcome`](crate::Outcome). It travels through
//!   `map`/`flat_map` untouched and is the only thing `recover` acts on.
//! - [`HandoffError`] reports *contract violations*: calls that break a
//!   state-machine precondition (double delivery, double registration, chaining
//!   from a terminal phase). These surface synchronously at the offending call
//!   site and are never captured into the outcome channel.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::completion::Phase;

/// A cloneable, shareable failure signal carried inside an
/// [`Outcome`](crate::Outcome).
///
/// String fields use `Arc<str>` so cloning a fault while it propagates through
/// continuation chains stays cheap. An optional source error is retained for
/// [`std::error::Error::source`] chains.
#[derive(Debug, Clone)]
pub struct Fault {
    message: Arc<str>,
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Fault {
    /// Create a fault from a plain description.
    pub fn msg(message: impl Into<Arc<str>>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a fault wrapping `source`, using its display text as the
    /// description.
    pub fn from_error<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: Arc::from(source.to_string()),
            source: Some(Arc::new(source)),
        }
    }

    /// The fault's description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the description is empty. Empty faults are rejected by
    /// [`Outcome::failure`](crate::Outcome::failure).
    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            Some(source) => Some(&**source),
            None => None,
        }
    }
}

impl From<&str> for Fault {
    fn from(message: &str) -> Self {
        Fault::msg(message)
    }
}

impl From<String> for Fault {
    fn from(message: String) -> Self {
        Fault::msg(message)
    }
}

/// Contract-violation errors raised by the completion state machine.
///
/// # Stability
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added without a
/// breaking change. Always include a wildcard arm when matching.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum HandoffError {
    /// A failure outcome was constructed with an empty fault description.
    #[error("fault must carry a non-empty description")]
    EmptyFault,

    /// An operation was attempted in a phase where it is not legal,
    /// e.g. delivering twice or registering a second continuation.
    #[error("{operation} is not permitted while {phase}")]
    InvalidPhase {
        /// The offending operation.
        operation: &'static str,
        /// The phase the state block was in at the call.
        phase: Phase,
    },

    /// The promise was dropped without delivering an outcome, so the
    /// completion can never be satisfied.
    #[error("promise was dropped before delivering an outcome")]
    Abandoned,

    /// A carried failure re-raised synchronously by the blocking
    /// [`Completion::get`](crate::Completion::get).
    #[error(transparent)]
    Faulted(#[from] Fault),
}
