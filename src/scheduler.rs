//! The deferral primitive every continuation goes through.
//!
//! Jobs run after the current synchronous frame, in the order they were
//! scheduled. By default they land on a thread-local [`MicrotaskQueue`] that
//! the host drains with [`run_microtasks`]; a different host can be installed
//! per thread with [`set_scheduler`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

pub type Job = Box<dyn FnOnce()>;

/// Defers a job until the caller's synchronous frame has unwound.
///
/// Implementations must run jobs in FIFO order and never from inside
/// `schedule` itself.
pub trait Scheduler {
    fn schedule(&self, job: Job);
}

/// A FIFO queue of jobs drained by its owner.
#[derive(Default)]
pub struct MicrotaskQueue {
    jobs: RefCell<VecDeque<Job>>,
    draining: Cell<bool>,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.borrow().is_empty()
    }

    /// Runs jobs until the queue is empty, including jobs queued by the jobs
    /// being run. Returns how many ran. A nested call made from inside a job
    /// returns 0 and leaves the work to the outer drain.
    pub fn drain(&self) -> usize {
        if self.draining.replace(true) {
            return 0;
        }
        // Cleared on unwind as well.
        let _draining = Draining(&self.draining);
        let mut ran = 0;
        loop {
            // The borrow ends before the job runs, jobs schedule more jobs.
            let job = self.jobs.borrow_mut().pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => break,
            }
        }
        tracing::trace!(jobs = ran, "microtask queue drained");
        ran
    }
}

struct Draining<'a>(&'a Cell<bool>);

impl Drop for Draining<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Scheduler for MicrotaskQueue {
    fn schedule(&self, job: Job) {
        self.jobs.borrow_mut().push_back(job);
    }
}

impl std::fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicrotaskQueue")
            .field("jobs", &self.len())
            .field("draining", &self.draining.get())
            .finish()
    }
}

thread_local! {
    static MICROTASKS: MicrotaskQueue = MicrotaskQueue::new();
    static HOST: RefCell<Option<Rc<dyn Scheduler>>> = const { RefCell::new(None) };
}

/// Defers `job` through the current thread's host, or the default microtask
/// queue when none is installed.
pub fn schedule(job: impl FnOnce() + 'static) {
    let job: Job = Box::new(job);
    let host = HOST.with(|host| host.borrow().clone());
    match host {
        Some(host) => host.schedule(job),
        None => MICROTASKS.with(|queue| queue.schedule(job)),
    }
}

/// Drains the thread's default microtask queue. See [`MicrotaskQueue::drain`].
pub fn run_microtasks() -> usize {
    MICROTASKS.with(MicrotaskQueue::drain)
}

pub fn pending_microtasks() -> usize {
    MICROTASKS.with(MicrotaskQueue::len)
}

/// Installs `host` as this thread's scheduler until the guard is dropped.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use deferred::scheduler::{self, MicrotaskQueue};
/// use deferred::Deferred;
///
/// let host = Rc::new(MicrotaskQueue::new());
/// let _guard = scheduler::set_scheduler(host.clone());
/// let deferred = Deferred::<i32, ()>::resolve(1);
/// assert_eq!(host.drain(), 1);
/// assert_eq!(deferred.outcome(), Some(Ok(1)));
/// ```
pub fn set_scheduler(host: Rc<dyn Scheduler>) -> ScopedScheduler {
    let prev = HOST.with(|cell| cell.replace(Some(host)));
    ScopedScheduler { prev }
}

/// Restores the previously installed host when dropped.
#[must_use = "the scheduler is uninstalled when the guard is dropped"]
pub struct ScopedScheduler {
    prev: Option<Rc<dyn Scheduler>>,
}

impl Drop for ScopedScheduler {
    fn drop(&mut self) {
        let prev = self.prev.take();
        HOST.with(|cell| {
            *cell.borrow_mut() = prev;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{pending_microtasks, run_microtasks, schedule, set_scheduler, MicrotaskQueue};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_fifo() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            schedule(move || seen.borrow_mut().push(i));
        }
        assert_eq!(pending_microtasks(), 3);
        assert!(seen.borrow().is_empty());
        assert_eq!(run_microtasks(), 3);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_jobs_scheduled_while_draining_run_after() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let outer = seen.clone();
        schedule(move || {
            let inner = outer.clone();
            schedule(move || inner.borrow_mut().push("nested"));
            outer.borrow_mut().push("first");
        });
        let second = seen.clone();
        schedule(move || second.borrow_mut().push("second"));
        assert_eq!(run_microtasks(), 3);
        assert_eq!(*seen.borrow(), vec!["first", "second", "nested"]);
    }

    #[test]
    fn test_reentrant_drain_is_noop() {
        let nested = Rc::new(RefCell::new(None));
        let slot = nested.clone();
        schedule(move || *slot.borrow_mut() = Some(run_microtasks()));
        run_microtasks();
        assert_eq!(*nested.borrow(), Some(0));
    }

    #[test]
    fn test_drains_again_after_job_panics() {
        schedule(|| panic!("job failed"));
        assert!(std::panic::catch_unwind(run_microtasks).is_err());

        let ran = Rc::new(RefCell::new(false));
        let flag = ran.clone();
        schedule(move || *flag.borrow_mut() = true);
        assert_eq!(run_microtasks(), 1);
        assert!(*ran.borrow());
    }

    #[test]
    fn test_scoped_host() {
        let host = Rc::new(MicrotaskQueue::new());
        {
            let _guard = set_scheduler(host.clone());
            schedule(|| {});
            assert_eq!(host.len(), 1);
            assert_eq!(pending_microtasks(), 0);
        }
        schedule(|| {});
        assert_eq!(host.len(), 1);
        assert_eq!(pending_microtasks(), 1);
        run_microtasks();
    }
}
