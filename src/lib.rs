//! Eager, single-threaded deferred values.
//!
//! A [`Deferred`] holds the eventual outcome of an operation: a value of type
//! `T`, or a rejection carrying an [`Error<E>`]. Settlement happens once;
//! continuations registered with [`Deferred::then`] and friends return new
//! deferreds, so work chains. Resolving with another deferred, or any
//! [`Thenable`], adopts its outcome. [`Deferred::all`],
//! [`Deferred::all_settled`], [`Deferred::race`] and [`Deferred::any`]
//! aggregate many deferreds into one.
//!
//! Nothing observes a settlement synchronously: state changes and
//! continuations are jobs on the thread's [`scheduler`], run in FIFO order by
//! [`scheduler::run_microtasks`], or implicitly when a deferred is awaited.
//!
//! ```
//! use deferred::{scheduler, Deferred, Resolution};
//!
//! let (resolver, deferred) = Deferred::<i32, String>::pending();
//! let doubled = deferred.and_then(|v| Resolution::ok(v * 2));
//! resolver.resolve(21);
//! scheduler::run_microtasks();
//! assert_eq!(doubled.outcome(), Some(Ok(42)));
//! ```

mod chain;
pub mod combinators;
mod deferred;
mod error;
pub mod scheduler;
pub mod unhandled;

pub use combinators::Settled;
pub use deferred::{Deferred, Rejection, Resolution, Resolver, State, Step, Thenable};
pub use error::{AggregateError, Error, ALL_REJECTED};
