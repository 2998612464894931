//! One-shot outcome delivery between a single producer and a single consumer.
//!
//! This library pairs a writer handle ([`Promise`]) with a reader handle
//! ([`Completion`]) over one shared state block. The promise delivers exactly
//! one [`Outcome`]: either a success value or a carried [`Fault`]. The
//! completion observes it by registering a continuation, by blocking in
//! [`get`](Completion::get), or by chaining [`map`](Completion::map) /
//! [`recover`](Completion::recover) into fresh promise/completion pairs.
//!
//! # Overview
//!
//! Delivery and registration commute: the consumer may register before the
//! producer delivers, or the producer may deliver first; whichever side arrives
//! second triggers the continuation, and both orders observe the same outcome.
//! Delivery happens at most once, and a second attempt is reported as a
//! contract violation rather than silently ignored.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  deliver   ┌─────────────────────┐  on_complete  ┌────────────────┐
//! │  Promise<T>  │──────────► │  CompletionState<T> │ ◄─────────────│  Completion<T> │
//! │  (producer)  │            │  lock + phase +     │               │  (consumer)    │
//! └──────────────┘            │  outcome/callback   │               └────────────────┘
//!                             └─────────────────────┘
//!                                        │ map / recover splice a continuation
//!                                        ▼ that feeds a fresh pair
//!                             ┌─────────────────────┐
//!                             │  CompletionState<U> │ ◄── next Completion<U>
//!                             └─────────────────────┘
//! ```
//!
//! Data flows one way (producer to consumer); control flows both ways, since
//! either side's arrival can be the one that runs the continuation. There is no
//! scheduler: continuations run inline on whichever thread performs the
//! delivery or the registration, while the block's internal [`SpinMutex`] is
//! held. Keep them short, never re-enter the same pair from inside one, and
//! prefer chaining into new pairs for anything elaborate.
//!
//! # Example
//!
//! ```rust
//! use handoff::Promise;
//!
//! let promise = Promise::new();
//! let completion = promise.completion();
//!
//! // Chain before the value arrives; the splice runs at delivery time.
//! let doubled = completion.map(|x: i32| x * 2)?;
//!
//! promise.set_value(21)?;
//! assert_eq!(doubled.get()?, 42);
//! # Ok::<(), handoff::HandoffError>(())
//! ```
//!
//! Blocking retrieval from another thread:
//!
//! ```rust
//! use handoff::Promise;
//!
//! let promise = Promise::new();
//! let completion = promise.completion();
//!
//! let waiter = std::thread::spawn(move || completion.get());
//! promise.set_value(String::from("ready"))?;
//! assert_eq!(waiter.join().unwrap()?, "ready");
//! # Ok::<(), handoff::HandoffError>(())
//! ```
//!
//! Failures travel the same pipe and only [`recover`](Completion::recover)
//! touches them:
//!
//! ```rust
//! use handoff::{Fault, Promise};
//!
//! let promise = Promise::new();
//! let recovered = promise
//!     .completion()
//!     .recover(|fault: Fault| fault.message().len())?
//!     .map(|n| n * 2)?;
//!
//! promise.set_fault("boom")?;
//! assert_eq!(recovered.get()?, 8);
//! # Ok::<(), handoff::HandoffError>(())
//! ```
//!
//! # Error channels
//!
//! Domain failures ride inside the [`Outcome`] as a [`Fault`] and flow through
//! chains untouched until something recovers them. Contract violations, like
//! delivering twice or registering two continuations, surface immediately as a
//! [`HandoffError`] at the offending call site and never enter the outcome
//! channel.
//!
//! # Abandonment
//!
//! Dropping a promise that never delivered moves the pair to the `Broken`
//! phase when nobody is waiting (later registrations fail with
//! [`HandoffError::Abandoned`]) and completes a waiting continuation with a
//! canned abandonment fault otherwise, so a blocked [`get`](Completion::get)
//! returns an error instead of hanging.

mod completion;
mod error;
mod outcome;
mod scope_exit;
mod spin_mutex;

pub use completion::{Completion, CompletionState, Phase, Promise};
pub use error::{Fault, HandoffError};
pub use outcome::Outcome;
pub use scope_exit::{on_scope_exit, ScopeExit};
pub use spin_mutex::{SpinGuard, SpinMutex};
