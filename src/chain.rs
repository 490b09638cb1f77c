use std::cell::Cell;
use std::fmt::Debug;
use std::rc::Rc;

use crate::{Deferred, Error, Resolution, Resolver, Step};

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    /// Registers a continuation pair and returns the deferred they settle.
    ///
    /// Whichever continuation matches the outcome runs from a scheduled job,
    /// never inside this call, even when `self` is already settled. Its
    /// `Ok` step resolves the returned deferred (adopting a deferred or
    /// thenable), its `Err` rejects it.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred::{Deferred, Resolution};
    /// use futures::executor::block_on;
    ///
    /// let failed = Deferred::<i32, &str>::reject("💥");
    /// let recovered = failed.then(
    ///     |v| Resolution::ok(v.to_string()),
    ///     |reason| Resolution::ok(format!("recovered from {reason}")),
    /// );
    /// assert_eq!(block_on(recovered), Ok("recovered from 💥".to_string()));
    /// ```
    pub fn then<U, S, F>(&self, on_success: S, on_failure: F) -> Deferred<U, E>
    where
        U: Clone + 'static,
        S: FnOnce(T) -> Step<U, E> + 'static,
        F: FnOnce(Error<E>) -> Step<U, E> + 'static,
    {
        let (resolver, next) = Deferred::pending();
        let on_failure_resolver = resolver.clone();
        self.subscribe(
            move |value| settle(&resolver, on_success(value)),
            move |reason| settle(&on_failure_resolver, on_failure(reason)),
        );
        next
    }

    /// `then` without a failure continuation: a rejection propagates as is.
    pub fn and_then<U, S>(&self, on_success: S) -> Deferred<U, E>
    where
        U: Clone + 'static,
        S: FnOnce(T) -> Step<U, E> + 'static,
    {
        self.then(on_success, Err)
    }

    /// `then` without a success continuation: a value propagates as is.
    pub fn catch<F>(&self, on_failure: F) -> Deferred<T, E>
    where
        F: FnOnce(Error<E>) -> Step<T, E> + 'static,
    {
        self.then(Resolution::ok, on_failure)
    }

    /// `then` with neither continuation: a new deferred settled the same way.
    pub fn forward(&self) -> Deferred<T, E> {
        self.then(Resolution::ok, Err)
    }

    /// Runs `on_settle` whichever way `self` settles, then passes the value
    /// or reason through.
    ///
    /// If `on_settle` fails, or hands back a deferred that rejects, that
    /// reason wins. A deferred it hands back is waited for first.
    pub fn finally<F>(&self, on_settle: F) -> Deferred<T, E>
    where
        F: FnOnce() -> Step<(), E> + 'static,
    {
        let on_fulfilled = Rc::new(Cell::new(Some(on_settle)));
        let on_rejected = on_fulfilled.clone();
        self.then(
            move |value| pass_through(run_once(&on_fulfilled), Resolution::ok(value)),
            move |reason| pass_through(run_once(&on_rejected), Err(reason)),
        )
    }
}

fn settle<U, E>(resolver: &Resolver<U, E>, step: Step<U, E>)
where
    U: Clone + 'static,
    E: Clone + Debug + 'static,
{
    match step {
        Ok(resolution) => resolver.resolve_with(resolution),
        Err(reason) => resolver.fail(reason),
    }
}

fn run_once<F, E>(slot: &Cell<Option<F>>) -> Step<(), E>
where
    F: FnOnce() -> Step<(), E>,
{
    match slot.take() {
        Some(on_settle) => on_settle(),
        None => Resolution::ok(()),
    }
}

fn pass_through<T, E>(settled: Step<(), E>, original: Step<T, E>) -> Step<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    match settled {
        Err(reason) => Err(reason),
        Ok(Resolution::Value(())) => original,
        Ok(pending) => {
            let gate = Deferred::from_resolution(pending);
            Ok(Resolution::Deferred(gate.and_then(move |()| original)))
        }
    }
}
