//! Aggregates over many deferreds, built only on [`Deferred::then`].

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::Rc;

use crate::error::ALL_REJECTED;
use crate::{AggregateError, Deferred, Error, Resolution, State};

/// How one input of [`Deferred::all_settled`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled<T, E> {
    Fulfilled { value: T },
    Rejected { reason: Error<E> },
}

impl<T, E> Settled<T, E> {
    /// `fulfilled` or `rejected`, never `pending`.
    pub fn status(&self) -> State {
        match self {
            Settled::Fulfilled { .. } => State::Fulfilled,
            Settled::Rejected { .. } => State::Rejected,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Settled::Fulfilled { value } => Some(value),
            Settled::Rejected { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&Error<E>> {
        match self {
            Settled::Fulfilled { .. } => None,
            Settled::Rejected { reason } => Some(reason),
        }
    }
}

/// Index-aligned result slots plus the count of inputs that reported.
struct Tally<V> {
    slots: RefCell<Vec<Option<V>>>,
    filled: Cell<usize>,
    total: usize,
}

impl<V> Tally<V> {
    fn new(total: usize) -> Rc<Self> {
        Rc::new(Self {
            slots: RefCell::new((0..total).map(|_| None).collect()),
            filled: Cell::new(0),
            total,
        })
    }

    /// Stores the report of input `index`. Hands back every slot, in input
    /// order, on the report that fills the last one.
    fn record(&self, index: usize, value: V) -> Option<Vec<V>> {
        self.slots.borrow_mut()[index] = Some(value);
        self.filled.set(self.filled.get() + 1);
        if self.filled.get() == self.total {
            Some(self.slots.take().into_iter().flatten().collect())
        } else {
            None
        }
    }
}

fn normalize<T, E, I>(inputs: I) -> Vec<Deferred<T, E>>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
    I: IntoIterator,
    I::Item: Into<Resolution<T, E>>,
{
    inputs
        .into_iter()
        .map(|input| Deferred::from_resolution(input.into()))
        .collect()
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    /// Fulfills with every input's value, index-aligned, once all fulfill.
    /// Rejects with the first rejection. An empty input fulfills with an
    /// empty vector.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred::{Deferred, Resolution};
    /// use futures::executor::block_on;
    ///
    /// let all = Deferred::<i32, ()>::all([
    ///     Resolution::Deferred(Deferred::resolve(1)),
    ///     Resolution::Value(2),
    ///     Resolution::Deferred(Deferred::resolve(3)),
    /// ]);
    /// assert_eq!(block_on(all), Ok(vec![1, 2, 3]));
    /// ```
    pub fn all<I>(inputs: I) -> Deferred<Vec<T>, E>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let inputs: Vec<Deferred<T, E>> = normalize(inputs);
        Deferred::new(move |resolver| {
            if inputs.is_empty() {
                resolver.resolve(Vec::new());
                return Ok(());
            }
            let tally = Tally::new(inputs.len());
            for (index, input) in inputs.into_iter().enumerate() {
                let tally = tally.clone();
                let on_value = resolver.clone();
                let on_reason = resolver.clone();
                input.then(
                    move |value| {
                        if let Some(values) = tally.record(index, value) {
                            on_value.resolve(values);
                        }
                        Resolution::ok(())
                    },
                    move |reason| {
                        on_reason.fail(reason);
                        Resolution::ok(())
                    },
                );
            }
            Ok(())
        })
    }

    /// Fulfills once every input settled, with a record per input. Never
    /// rejects.
    pub fn all_settled<I>(inputs: I) -> Deferred<Vec<Settled<T, E>>, E>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let inputs: Vec<Deferred<T, E>> = normalize(inputs);
        Deferred::new(move |resolver| {
            if inputs.is_empty() {
                resolver.resolve(Vec::new());
                return Ok(());
            }
            let tally = Tally::new(inputs.len());
            for (index, input) in inputs.into_iter().enumerate() {
                let (fulfilled_tally, rejected_tally) = (tally.clone(), tally.clone());
                let (on_value, on_reason) = (resolver.clone(), resolver.clone());
                input.then(
                    move |value| {
                        let record = Settled::Fulfilled { value };
                        if let Some(records) = fulfilled_tally.record(index, record) {
                            on_value.resolve(records);
                        }
                        Resolution::ok(())
                    },
                    move |reason| {
                        let record = Settled::Rejected { reason };
                        if let Some(records) = rejected_tally.record(index, record) {
                            on_reason.resolve(records);
                        }
                        Resolution::ok(())
                    },
                );
            }
            Ok(())
        })
    }

    /// Settles the way the first input to settle did. An empty input never
    /// settles.
    pub fn race<I>(inputs: I) -> Deferred<T, E>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let inputs: Vec<Deferred<T, E>> = normalize(inputs);
        Deferred::new(move |resolver| {
            for input in inputs {
                let (on_value, on_reason) = (resolver.clone(), resolver.clone());
                input.then(
                    move |value| {
                        on_value.resolve(value);
                        Resolution::ok(())
                    },
                    move |reason| {
                        on_reason.fail(reason);
                        Resolution::ok(())
                    },
                );
            }
            Ok(())
        })
    }

    /// Fulfills with the first input to fulfill. Once every input rejected,
    /// rejects with an [`Error::Aggregate`] holding the reasons in input
    /// order. An empty input never settles.
    pub fn any<I>(inputs: I) -> Deferred<T, E>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let inputs: Vec<Deferred<T, E>> = normalize(inputs);
        Deferred::new(move |resolver| {
            let tally = Tally::new(inputs.len());
            for (index, input) in inputs.into_iter().enumerate() {
                let tally = tally.clone();
                let (on_value, on_reason) = (resolver.clone(), resolver.clone());
                input.then(
                    move |value| {
                        on_value.resolve(value);
                        Resolution::ok(())
                    },
                    move |reason| {
                        if let Some(errors) = tally.record(index, reason) {
                            let aggregate = AggregateError::new(errors, ALL_REJECTED);
                            on_reason.fail(Error::Aggregate(aggregate));
                        }
                        Resolution::ok(())
                    },
                );
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Settled;
    use crate::error::ALL_REJECTED;
    use crate::{scheduler::run_microtasks, Deferred, Error, Resolution, State};
    use futures::executor::block_on;

    #[test]
    fn test_all_with_success() {
        let all = Deferred::<i32, &str>::all([Deferred::resolve(1), Deferred::resolve(2)]);
        assert_eq!(block_on(all), Ok(vec![1, 2]));
    }

    #[test]
    fn test_all_keeps_input_order() {
        let (resolvers, inputs): (Vec<_>, Vec<_>) =
            (0..3).map(|_| Deferred::<i32, ()>::pending()).unzip();
        let all = Deferred::<i32, ()>::all(inputs);
        for (value, resolver) in resolvers.iter().enumerate().rev() {
            resolver.resolve(value as i32 * 10);
            run_microtasks();
        }
        assert_eq!(block_on(all), Ok(vec![0, 10, 20]));
    }

    #[test]
    fn test_all_short_circuits_on_rejection() {
        let (_never, pending) = Deferred::<i32, &str>::pending();
        let all = Deferred::<i32, &str>::all([
            pending,
            Deferred::reject("Error!"),
            Deferred::resolve(3),
        ]);
        assert_eq!(block_on(all), Err(Error::Rejected("Error!")));
    }

    #[test]
    fn test_all_empty() {
        let all = Deferred::<i32, ()>::all(Vec::<Deferred<i32, ()>>::new());
        run_microtasks();
        assert_eq!(all.outcome(), Some(Ok(vec![])));
    }

    #[test]
    fn test_all_settled() {
        let settled = Deferred::<&str, &str>::all_settled([
            Deferred::resolve("default"),
            Deferred::reject("default"),
        ]);
        let records = block_on(settled).unwrap();
        assert_eq!(
            records,
            vec![
                Settled::Fulfilled { value: "default" },
                Settled::Rejected { reason: Error::Rejected("default") },
            ]
        );
        let statuses: Vec<String> = records.iter().map(|r| r.status().to_string()).collect();
        assert_eq!(statuses, vec!["fulfilled", "rejected"]);
        assert_eq!(records[0].value(), Some(&"default"));
        assert_eq!(records[1].reason(), Some(&Error::Rejected("default")));
    }

    #[test]
    fn test_all_settled_waits_for_every_input() {
        let (first, a) = Deferred::<i32, i32>::pending();
        let (second, b) = Deferred::<i32, i32>::pending();
        let settled = Deferred::<i32, i32>::all_settled([a, b]);
        second.reject(2);
        run_microtasks();
        assert_eq!(settled.state(), State::Pending);
        first.resolve(1);
        assert_eq!(
            block_on(settled),
            Ok(vec![
                Settled::Fulfilled { value: 1 },
                Settled::Rejected { reason: Error::Rejected(2) },
            ])
        );
    }

    #[test]
    fn test_all_settled_empty() {
        let settled = Deferred::<i32, ()>::all_settled(Vec::<Resolution<i32, ()>>::new());
        assert_eq!(block_on(settled), Ok(vec![]));
    }

    #[test]
    fn test_race_first_to_settle_wins() {
        let (slow, a) = Deferred::<&str, ()>::pending();
        let (fast, b) = Deferred::<&str, ()>::pending();
        let race = Deferred::<&str, ()>::race([a, b]);
        fast.resolve("B");
        run_microtasks();
        slow.resolve("A");
        assert_eq!(block_on(race), Ok("B"));
    }

    #[test]
    fn test_race_with_fail() {
        let race = Deferred::<i32, i32>::race([Deferred::reject(1), Deferred::reject(2)]);
        assert_eq!(block_on(race), Err(Error::Rejected(1)));
    }

    #[test]
    fn test_race_empty_never_settles() {
        let race = Deferred::<i32, ()>::race(Vec::<Deferred<i32, ()>>::new());
        run_microtasks();
        assert_eq!(race.state(), State::Pending);
    }

    #[test]
    fn test_any_first_fulfillment_wins() {
        let any = Deferred::<i32, i32>::any([Deferred::reject(1), Deferred::resolve(2)]);
        assert_eq!(block_on(any), Ok(2));
    }

    #[test]
    fn test_any_all_rejected() {
        let any = Deferred::<i32, i32>::any([Deferred::reject(1), Deferred::reject(2)]);
        match block_on(any) {
            Err(Error::Aggregate(aggregate)) => {
                assert_eq!(aggregate.errors(), &[Error::Rejected(1), Error::Rejected(2)]);
                assert_eq!(aggregate.message(), ALL_REJECTED);
            }
            other => panic!("expected an aggregate rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_any_reasons_follow_input_order() {
        let (first, a) = Deferred::<i32, &str>::pending();
        let (second, b) = Deferred::<i32, &str>::pending();
        let any = Deferred::<i32, &str>::any([a, b]);
        second.reject("second");
        run_microtasks();
        first.reject("first");
        let errors = match block_on(any) {
            Err(Error::Aggregate(aggregate)) => aggregate.into_errors(),
            other => panic!("expected an aggregate rejection, got {other:?}"),
        };
        assert_eq!(errors, vec![Error::Rejected("first"), Error::Rejected("second")]);
    }

    #[test]
    fn test_any_empty_never_settles() {
        let any = Deferred::<i32, ()>::any(Vec::<Deferred<i32, ()>>::new());
        run_microtasks();
        assert_eq!(any.state(), State::Pending);
    }
}
