use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::{scheduler, unhandled, Error};

/// Where a [`Deferred`] is in its lifecycle. Never leaves `Fulfilled` or
/// `Rejected` once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Pending => "pending",
            State::Fulfilled => "fulfilled",
            State::Rejected => "rejected",
        })
    }
}

/// Anything a deferred can adopt the settlement of.
///
/// `then` must eventually call `resolver` at most once; extra calls are
/// ignored. Returning `Err` rejects the adopting deferred unless the resolver
/// was already used.
pub trait Thenable<T, E> {
    fn then(&self, resolver: Resolver<T, E>) -> Result<(), Error<E>>;
}

/// A value offered to the success path of a deferred.
pub enum Resolution<T, E> {
    Value(T),
    /// Adopt this deferred's eventual outcome.
    Deferred(Deferred<T, E>),
    /// Adopt a foreign thenable's eventual outcome.
    Thenable(Rc<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    /// A continuation step that fulfills with `value`.
    pub fn ok(value: T) -> Step<T, E> {
        Ok(Resolution::Value(value))
    }
}

impl<T, E> From<Deferred<T, E>> for Resolution<T, E> {
    fn from(deferred: Deferred<T, E>) -> Self {
        Resolution::Deferred(deferred)
    }
}

/// A value offered to the failure path of a deferred. Rejecting with a
/// deferred or thenable adopts its outcome, whichever way it settles.
pub enum Rejection<T, E> {
    Reason(Error<E>),
    Deferred(Deferred<T, E>),
    Thenable(Rc<dyn Thenable<T, E>>),
}

impl<T, E> From<Error<E>> for Rejection<T, E> {
    fn from(reason: Error<E>) -> Self {
        Rejection::Reason(reason)
    }
}

impl<T, E> From<Deferred<T, E>> for Rejection<T, E> {
    fn from(deferred: Deferred<T, E>) -> Self {
        Rejection::Deferred(deferred)
    }
}

/// What a continuation produces: `Ok` continues down the success path with
/// full unwrapping, `Err` rejects.
pub type Step<T, E> = Result<Resolution<T, E>, Error<E>>;

enum Slot<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(Error<E>),
}

impl<T: Clone, E: Clone> Slot<T, E> {
    fn settled(&self) -> Option<Result<T, Error<E>>> {
        match self {
            Slot::Pending => None,
            Slot::Fulfilled(value) => Some(Ok(value.clone())),
            Slot::Rejected(reason) => Some(Err(reason.clone())),
        }
    }
}

type OnSuccess<T> = Box<dyn FnOnce(T)>;
type OnFailure<E> = Box<dyn FnOnce(Error<E>)>;

struct Inner<T, E> {
    slot: Slot<T, E>,
    success_queue: Vec<OnSuccess<T>>,
    failure_queue: Vec<OnFailure<E>>,
    wakers: Vec<Waker>,
}

/// A single-assignment container for the eventual result of an operation.
///
/// Handles are cheap to clone and all observe the same settlement. Every
/// state change and every continuation runs from a job on the thread's
/// [`scheduler`], never inside the call that caused it.
///
/// # Examples
///
/// ```
/// use deferred::{Deferred, Resolution};
/// use futures::executor::block_on;
///
/// let deferred = Deferred::<i32, String>::new(|resolver| {
///     resolver.resolve(3);
///     Ok(())
/// });
/// let chained = deferred.and_then(|v| Resolution::ok(v * 4));
/// assert_eq!(block_on(chained), Ok(12));
/// ```
pub struct Deferred<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    /// Runs `initializer` synchronously with the settlement capabilities of
    /// the new deferred. An `Err` from the initializer rejects it, unless it
    /// was already settled.
    pub fn new<F>(initializer: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), Error<E>>,
    {
        let (resolver, deferred) = Self::pending();
        if let Err(reason) = initializer(resolver.clone()) {
            resolver.fail(reason);
        }
        deferred
    }

    /// A pending deferred and the capabilities that settle it.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred::{scheduler, Deferred, State};
    ///
    /// let (resolver, deferred) = Deferred::<&str, ()>::pending();
    /// scheduler::run_microtasks();
    /// assert_eq!(deferred.state(), State::Pending);
    /// resolver.resolve("Hi");
    /// scheduler::run_microtasks();
    /// assert_eq!(deferred.outcome(), Some(Ok("Hi")));
    /// ```
    pub fn pending() -> (Resolver<T, E>, Self) {
        let deferred = Self {
            inner: Rc::new(RefCell::new(Inner {
                slot: Slot::Pending,
                success_queue: vec![],
                failure_queue: vec![],
                wakers: vec![],
            })),
        };
        (Resolver::new(deferred.clone()), deferred)
    }

    pub fn resolve(value: T) -> Self {
        Self::new(|resolver| {
            resolver.resolve(value);
            Ok(())
        })
    }

    pub fn reject(reason: E) -> Self {
        Self::new(|resolver| {
            resolver.reject(reason);
            Ok(())
        })
    }

    /// Returns a deferred input as is; wraps anything else.
    pub fn from_resolution(resolution: Resolution<T, E>) -> Self {
        match resolution {
            Resolution::Deferred(deferred) => deferred,
            resolution => Self::new(|resolver| {
                resolver.resolve_with(resolution);
                Ok(())
            }),
        }
    }

    pub fn state(&self) -> State {
        match self.inner.borrow().slot {
            Slot::Pending => State::Pending,
            Slot::Fulfilled(_) => State::Fulfilled,
            Slot::Rejected(_) => State::Rejected,
        }
    }

    /// A copy of the settled value or reason, `None` while pending.
    pub fn outcome(&self) -> Option<Result<T, Error<E>>> {
        self.inner.borrow().slot.settled()
    }

    /// Whether both handles point at the same deferred.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Registers a pair of raw continuations. Exactly one of them runs, from
    /// a scheduled job.
    pub(crate) fn subscribe<S, F>(&self, on_success: S, on_failure: F)
    where
        S: FnOnce(T) + 'static,
        F: FnOnce(Error<E>) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        match inner.slot.settled() {
            None => {
                inner.success_queue.push(Box::new(on_success));
                inner.failure_queue.push(Box::new(on_failure));
            }
            Some(Ok(value)) => {
                drop(inner);
                scheduler::schedule(move || on_success(value));
            }
            Some(Err(reason)) => {
                drop(inner);
                scheduler::schedule(move || on_failure(reason));
            }
        }
    }

    fn settle_success(&self, resolution: Resolution<T, E>) {
        match resolution {
            Resolution::Value(value) => {
                let this = self.clone();
                scheduler::schedule(move || this.commit(Ok(value)));
            }
            Resolution::Deferred(source) => self.adopt_deferred(source),
            Resolution::Thenable(source) => self.adopt(source),
        }
    }

    fn settle_failure(&self, rejection: Rejection<T, E>) {
        match rejection {
            Rejection::Reason(reason) => {
                let this = self.clone();
                scheduler::schedule(move || this.commit(Err(reason)));
            }
            Rejection::Deferred(source) => self.adopt_deferred(source),
            Rejection::Thenable(source) => self.adopt(source),
        }
    }

    fn adopt_deferred(&self, source: Deferred<T, E>) {
        if source.ptr_eq(self) {
            tracing::debug!("deferred asked to adopt itself");
            let this = self.clone();
            scheduler::schedule(move || this.commit(Err(Error::ChainingCycle)));
            return;
        }
        self.adopt(Rc::new(source));
    }

    fn adopt(&self, source: Rc<dyn Thenable<T, E>>) {
        let target = self.clone();
        scheduler::schedule(move || {
            tracing::trace!("adopting thenable");
            // Fresh guard: only the first of the thenable's calls counts.
            let resolver = Resolver::new(target);
            if let Err(reason) = source.then(resolver.clone()) {
                resolver.fail(reason);
            }
        });
    }

    fn commit(&self, outcome: Result<T, Error<E>>) {
        let mut inner = self.inner.borrow_mut();
        if !matches!(inner.slot, Slot::Pending) {
            return;
        }
        let wakers = std::mem::take(&mut inner.wakers);
        let success_queue = std::mem::take(&mut inner.success_queue);
        let failure_queue = std::mem::take(&mut inner.failure_queue);
        match outcome {
            Ok(value) => {
                inner.slot = Slot::Fulfilled(value.clone());
                drop(inner);
                tracing::trace!(
                    state = %State::Fulfilled,
                    continuations = success_queue.len(),
                    "deferred settled"
                );
                drop(failure_queue);
                wakers.into_iter().for_each(Waker::wake);
                for continuation in success_queue {
                    continuation(value.clone());
                }
            }
            Err(reason) => {
                inner.slot = Slot::Rejected(reason.clone());
                drop(inner);
                tracing::trace!(
                    state = %State::Rejected,
                    continuations = failure_queue.len(),
                    "deferred settled"
                );
                drop(success_queue);
                if failure_queue.is_empty() && wakers.is_empty() {
                    unhandled::report(&reason);
                }
                wakers.into_iter().for_each(Waker::wake);
                for continuation in failure_queue {
                    continuation(reason.clone());
                }
            }
        }
    }
}

impl<T, E> Thenable<T, E> for Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    fn then(&self, resolver: Resolver<T, E>) -> Result<(), Error<E>> {
        if self.ptr_eq(&resolver.target) {
            tracing::debug!("deferred asked to adopt itself as a thenable");
            return Err(Error::ChainingCycle);
        }
        let on_failure = resolver.clone();
        self.subscribe(
            move |value| resolver.resolve(value),
            move |reason| on_failure.fail(reason),
        );
        Ok(())
    }
}

impl<T, E> Future for Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    type Output = Result<T, Error<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        {
            let mut inner = self.inner.borrow_mut();
            if let Some(outcome) = inner.slot.settled() {
                return Poll::Ready(outcome);
            }
            // A waiting task counts as an observer of a rejection.
            if !inner.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                inner.wakers.push(cx.waker().clone());
            }
        }
        // Nobody else drives the default queue on this thread.
        scheduler::run_microtasks();
        match self.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

impl<T, E> Debug for Deferred<T, E>
where
    T: Debug,
    E: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        let mut out = f.debug_struct("Deferred");
        match &inner.slot {
            Slot::Pending => out.field("state", &State::Pending),
            Slot::Fulfilled(value) => out.field("state", &State::Fulfilled).field("value", value),
            Slot::Rejected(reason) => out.field("state", &State::Rejected).field("reason", reason),
        };
        out.finish()
    }
}

/// The settlement capabilities of one [`Deferred`].
///
/// Clones share a single "used" flag: the first `resolve*`/`reject*`/`fail`
/// call made through any of them takes effect, every later one is ignored.
pub struct Resolver<T, E> {
    target: Deferred<T, E>,
    used: Rc<Cell<bool>>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            used: self.used.clone(),
        }
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    fn new(target: Deferred<T, E>) -> Self {
        Self {
            target,
            used: Rc::new(Cell::new(false)),
        }
    }

    pub fn resolve(&self, value: T) {
        self.resolve_with(Resolution::Value(value));
    }

    pub fn resolve_with(&self, resolution: Resolution<T, E>) {
        if self.claim() {
            self.target.settle_success(resolution);
        }
    }

    pub fn reject(&self, reason: E) {
        self.fail(Error::Rejected(reason));
    }

    pub fn fail(&self, reason: Error<E>) {
        self.reject_with(Rejection::Reason(reason));
    }

    pub fn reject_with(&self, rejection: Rejection<T, E>) {
        if self.claim() {
            self.target.settle_failure(rejection);
        }
    }

    pub fn is_used(&self) -> bool {
        self.used.get()
    }

    fn claim(&self) -> bool {
        !self.used.replace(true)
    }
}

impl<T, E> Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("used", &self.used.get()).finish()
    }
}
