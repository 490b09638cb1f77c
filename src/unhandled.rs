//! Reporting of rejections nobody was listening for.
//!
//! A deferred that settles as rejected with no failure continuation and no
//! waiting task produces an [`UnhandledRejection`]. A continuation attached
//! later still observes the reason; the report only says nobody was there at
//! settlement time.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use crate::Error;

/// A rejection that had no observer when it settled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("(uncaught error in deferred) {reason}")]
pub struct UnhandledRejection {
    reason: String,
}

impl UnhandledRejection {
    /// `Debug` rendering of the rejection reason.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

pub type Handler = Rc<dyn Fn(&UnhandledRejection)>;

thread_local! {
    static HANDLER: RefCell<Option<Handler>> = const { RefCell::new(None) };
}

/// Routes this thread's unhandled rejections to `handler` instead of the
/// default `tracing` warning. Returns the handler it replaced.
pub fn set_handler(handler: impl Fn(&UnhandledRejection) + 'static) -> Option<Handler> {
    HANDLER.with(|cell| cell.replace(Some(Rc::new(handler))))
}

/// Removes the installed handler, restoring the default warning.
pub fn take_handler() -> Option<Handler> {
    HANDLER.with(|cell| cell.borrow_mut().take())
}

pub(crate) fn report<E: Debug>(reason: &Error<E>) {
    let rejection = UnhandledRejection {
        reason: format!("{reason:?}"),
    };
    // Cloned out so the handler may replace itself.
    let handler = HANDLER.with(|cell| cell.borrow().clone());
    match handler {
        Some(handler) => handler(&rejection),
        None => tracing::warn!(reason = %rejection.reason, "uncaught error in deferred"),
    }
}

#[cfg(test)]
mod tests {
    use super::{report, set_handler, take_handler};
    use crate::Error;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_handler_receives_reason() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        set_handler(move |rejection| sink.borrow_mut().push(rejection.to_string()));
        report(&Error::Rejected("boom"));
        assert_eq!(
            *seen.borrow(),
            vec![r#"(uncaught error in deferred) Rejected("boom")"#.to_string()]
        );
        assert!(take_handler().is_some());
        assert!(take_handler().is_none());
    }
}
