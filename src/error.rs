/// Message carried by the aggregate produced when every input of
/// [`Deferred::any`](crate::Deferred::any) rejects.
pub const ALL_REJECTED: &str = "All promises were rejected.";

/// The reason a [`Deferred`](crate::Deferred) was rejected with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error<E> {
    /// A reason supplied by user code, either through a resolver or by a
    /// continuation returning `Err`.
    #[error("{0}")]
    Rejected(E),
    /// A deferred was asked to adopt its own settlement.
    #[error("chaining cycle detected for promise")]
    ChainingCycle,
    /// Every input of `any` rejected.
    #[error("{0}")]
    Aggregate(AggregateError<E>),
}

impl<E> Error<E> {
    /// The user reason, if this is a plain rejection.
    pub fn reason(&self) -> Option<&E> {
        match self {
            Error::Rejected(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Every reason collected by `any`, index-aligned with its inputs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AggregateError<E> {
    errors: Vec<Error<E>>,
    message: String,
}

impl<E> AggregateError<E> {
    /// Wraps `errors`, in input order, under `message`.
    pub fn new(errors: Vec<Error<E>>, message: impl Into<String>) -> Self {
        Self {
            errors,
            message: message.into(),
        }
    }

    /// The collected reasons, index-aligned with the inputs.
    pub fn errors(&self) -> &[Error<E>] {
        &self.errors
    }

    /// The human-readable summary, [`ALL_REJECTED`] when built by `any`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Consumes the aggregate, returning the reasons.
    pub fn into_errors(self) -> Vec<Error<E>> {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::{AggregateError, Error, ALL_REJECTED};

    #[test]
    fn test_display() {
        assert_eq!(Error::Rejected("boom").to_string(), "boom");
        assert_eq!(
            Error::<&str>::ChainingCycle.to_string(),
            "chaining cycle detected for promise"
        );
        let aggregate =
            AggregateError::new(vec![Error::Rejected(1), Error::Rejected(2)], ALL_REJECTED);
        assert_eq!(Error::Aggregate(aggregate).to_string(), ALL_REJECTED);
    }

    #[test]
    fn test_reason() {
        assert_eq!(Error::Rejected(7).reason(), Some(&7));
        assert_eq!(Error::<i32>::ChainingCycle.reason(), None);
    }
}
