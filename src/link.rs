//! One-shot completion signals and the dependency link built on them

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::error;

use crate::error::{panic_message, TaskError};
use crate::pool::lock;

/// Identifies a continuation registered on a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

type Continuation<V> = Box<dyn FnOnce(&V) + Send + 'static>;

/// A continuation bound to the value it runs with
type Invocation = Box<dyn FnOnce()>;

thread_local! {
    /// Invocations queued behind the drain running on this thread, `None`
    /// when no drain is active.
    static PENDING: RefCell<Option<VecDeque<Invocation>>> = const { RefCell::new(None) };
}

struct Slot<V> {
    value: Option<V>,
    next_id: u64,
    continuations: BTreeMap<SubscriberId, Continuation<V>>,
}

/// A value that is set at most once, with continuations run exactly once.
///
/// The value and the continuation map live under the same lock, so a
/// subscriber either lands in the map before completion (and is drained by
/// `complete`) or observes the value and runs itself. Continuations always run
/// outside the lock.
///
/// Continuations that complete further signals do not nest: the outermost
/// `complete` or `subscribe` on a thread drains every invocation queued
/// beneath it, so a cascade down a chain of any length runs in constant stack.
pub(crate) struct OneShot<V> {
    completed: AtomicBool,
    slot: Mutex<Slot<V>>,
}

impl<V: Clone + 'static> OneShot<V> {
    pub(crate) fn new() -> Self {
        Self {
            completed: AtomicBool::new(false),
            slot: Mutex::new(Slot {
                value: None,
                next_id: 0,
                continuations: BTreeMap::new(),
            }),
        }
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub(crate) fn value(&self) -> Option<V> {
        lock(&self.slot).value.clone()
    }

    pub(crate) fn subscribe<F>(&self, continuation: F) -> SubscriberId
    where
        F: FnOnce(&V) + Send + 'static,
    {
        let mut slot = lock(&self.slot);
        let id = SubscriberId(slot.next_id);
        slot.next_id += 1;

        match slot.value.clone() {
            Some(value) => {
                drop(slot);
                drain(VecDeque::from([bind(Box::new(continuation), value)]));
            }
            None => {
                slot.continuations.insert(id, Box::new(continuation));
            }
        }
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) -> bool {
        lock(&self.slot).continuations.remove(&id).is_some()
    }

    /// Sets the value and runs pending continuations in registration order.
    /// Returns `false` if a value was already set.
    pub(crate) fn complete(&self, value: V) -> bool {
        let continuations = {
            let mut slot = lock(&self.slot);
            if slot.value.is_some() {
                return false;
            }
            slot.value = Some(value.clone());
            self.completed.store(true, Ordering::Release);
            std::mem::take(&mut slot.continuations)
        };

        drain(
            continuations
                .into_values()
                .map(|continuation| bind(continuation, value.clone()))
                .collect(),
        );
        true
    }
}

fn bind<V: 'static>(continuation: Continuation<V>, value: V) -> Invocation {
    Box::new(move || {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| continuation(&value))) {
            error!(
                "Completion callback panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    })
}

/// Runs `invocations` in order. If a drain is already active on this thread
/// they are queued behind it instead, and run before it returns.
fn drain(invocations: VecDeque<Invocation>) {
    let nested = PENDING.with(|pending| {
        let mut pending = pending.borrow_mut();
        if let Some(queue) = pending.as_mut() {
            queue.extend(invocations);
            return true;
        }
        *pending = Some(invocations);
        false
    });
    if nested {
        return;
    }

    let _reset = DrainGuard;
    while let Some(invocation) =
        PENDING.with(|pending| pending.borrow_mut().as_mut().and_then(VecDeque::pop_front))
    {
        invocation();
    }
}

/// Deactivates the drain even if an invocation unwinds
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        PENDING.with(|pending| *pending.borrow_mut() = None);
    }
}

/// A body invocation that failed, by element index within its handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub index: usize,
    pub error: TaskError,
}

/// Terminal state of a handle as seen through its link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every body invocation succeeded
    Succeeded,
    /// All batches ran, some invocations failed
    Failed(Arc<Vec<TaskFailure>>),
    /// The handle never ran to completion: its dependency was cancelled, the
    /// pool refused its batches, or it was dropped unscheduled
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// Failures recorded for the handle, empty unless `Failed`
    pub fn failures(&self) -> &[TaskFailure] {
        match self {
            Outcome::Failed(failures) => failures.as_slice(),
            _ => &[],
        }
    }
}

/// The completion signal a handle exposes for chaining.
///
/// Cloning is cheap; all clones observe the same signal.
#[derive(Clone)]
pub struct DependencyLink {
    signal: Arc<OneShot<Outcome>>,
}

impl DependencyLink {
    pub(crate) fn new() -> Self {
        Self {
            signal: Arc::new(OneShot::new()),
        }
    }

    /// Whether the owning handle reached a terminal state
    pub fn is_completed(&self) -> bool {
        self.signal.is_completed()
    }

    /// The terminal outcome, if reached
    pub fn outcome(&self) -> Option<Outcome> {
        self.signal.value()
    }

    /// Registers a continuation.
    ///
    /// If the link is already completed the continuation runs immediately on
    /// the calling thread; otherwise it runs once, on the thread that
    /// completes the link. Called from inside another continuation, it runs
    /// after that continuation returns.
    pub fn subscribe<F>(&self, continuation: F) -> SubscriberId
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        self.signal.subscribe(continuation)
    }

    /// Removes a continuation that has not fired yet
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.signal.unsubscribe(id)
    }

    /// Completes the link. Only the owning handle calls this.
    pub(crate) fn mark_completed(&self, outcome: Outcome) -> bool {
        self.signal.complete(outcome)
    }

    /// Waits for the terminal outcome.
    pub async fn wait(&self) -> Outcome {
        let (tx, rx) = oneshot::channel();
        self.subscribe(move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        rx.await.unwrap_or(Outcome::Cancelled)
    }

    /// Blocks the current thread until the terminal outcome.
    ///
    /// Panics when called from inside an async runtime; use [`wait`](Self::wait)
    /// there. Must not be called from inside a continuation.
    pub fn wait_blocking(&self) -> Outcome {
        let (tx, rx) = oneshot::channel();
        self.subscribe(move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        rx.blocking_recv().unwrap_or(Outcome::Cancelled)
    }
}

impl fmt::Debug for DependencyLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyLink")
            .field("outcome", &self.outcome())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use tokio::time::{timeout, Duration};

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnOnce(&Outcome) + Send + 'static {
        let counter = counter.clone();
        move |_: &Outcome| {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_subscribe_before_completion_fires_once() {
        let link = DependencyLink::new();
        let fired = Arc::new(AtomicUsize::new(0));
        link.subscribe(counting(&fired));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        assert!(link.mark_completed(Outcome::Succeeded));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Completing again neither changes the outcome nor re-fires
        assert!(!link.mark_completed(Outcome::Cancelled));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(link.outcome(), Some(Outcome::Succeeded));
    }

    #[test]
    fn test_subscribe_after_completion_fires_immediately() {
        let link = DependencyLink::new();
        link.mark_completed(Outcome::Succeeded);
        assert!(link.is_completed());

        let fired = Arc::new(AtomicUsize::new(0));
        link.subscribe(counting(&fired));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_continuations_run_in_registration_order() {
        let link = DependencyLink::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            link.subscribe(move |_| order.lock().unwrap().push(i));
        }
        link.mark_completed(Outcome::Succeeded);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_unsubscribe_prevents_firing() {
        let link = DependencyLink::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let id = link.subscribe(counting(&fired));
        assert!(link.unsubscribe(id));
        assert!(!link.unsubscribe(id));

        link.mark_completed(Outcome::Succeeded);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_continuation_does_not_block_others() {
        let link = DependencyLink::new();
        let fired = Arc::new(AtomicUsize::new(0));
        link.subscribe(|_| panic!("bad subscriber"));
        link.subscribe(counting(&fired));
        link.mark_completed(Outcome::Succeeded);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_continuation_may_subscribe_to_same_link() {
        let link = DependencyLink::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let inner_link = link.clone();
        let inner_fired = fired.clone();
        link.subscribe(move |_| {
            inner_link.subscribe(counting(&inner_fired));
        });
        link.mark_completed(Outcome::Succeeded);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_long_completion_cascade_runs_iteratively() {
        const LINKS: usize = 100_000;

        let links: Vec<DependencyLink> = (0..LINKS).map(|_| DependencyLink::new()).collect();
        for pair in links.windows(2) {
            let next = pair[1].clone();
            pair[0].subscribe(move |outcome| {
                next.mark_completed(outcome.clone());
            });
        }

        links[0].mark_completed(Outcome::Cancelled);
        assert_eq!(links[LINKS - 1].outcome(), Some(Outcome::Cancelled));
    }

    #[test]
    fn test_nested_completions_keep_registration_order() {
        let (first, second) = (DependencyLink::new(), DependencyLink::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let (log, next) = (order.clone(), second.clone());
        first.subscribe(move |_| {
            log.lock().unwrap().push("first-a");
            next.mark_completed(Outcome::Succeeded);
        });
        let log = order.clone();
        first.subscribe(move |_| log.lock().unwrap().push("first-b"));
        let log = order.clone();
        second.subscribe(move |_| log.lock().unwrap().push("second"));

        first.mark_completed(Outcome::Succeeded);
        assert_eq!(*order.lock().unwrap(), vec!["first-a", "first-b", "second"]);
    }

    #[test]
    fn test_concurrent_subscribe_and_complete_fire_exactly_once() {
        const ROUNDS: usize = 2000;
        const SUBSCRIBERS: usize = 3;

        for _ in 0..ROUNDS {
            let link = DependencyLink::new();
            let fired = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(SUBSCRIBERS + 1));

            let subscribers: Vec<_> = (0..SUBSCRIBERS)
                .map(|_| {
                    let link = link.clone();
                    let barrier = barrier.clone();
                    let callback = counting(&fired);
                    thread::spawn(move || {
                        barrier.wait();
                        link.subscribe(callback);
                    })
                })
                .collect();

            barrier.wait();
            link.mark_completed(Outcome::Succeeded);
            for handle in subscribers {
                handle.join().unwrap();
            }

            assert_eq!(fired.load(Ordering::SeqCst), SUBSCRIBERS);
        }
    }

    #[test]
    fn test_outcome_failures_accessor() {
        let failures = Arc::new(vec![TaskFailure {
            index: 3,
            error: TaskError::Failed("nope".into()),
        }]);
        let outcome = Outcome::Failed(failures);
        assert!(!outcome.is_success());
        assert_eq!(outcome.failures().len(), 1);
        assert_eq!(outcome.failures()[0].index, 3);
        assert!(Outcome::Succeeded.failures().is_empty());
        assert!(Outcome::Cancelled.is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_resolves_on_completion() {
        let link = DependencyLink::new();
        let completer = link.clone();
        thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(10));
            completer.mark_completed(Outcome::Succeeded);
        });

        let outcome = timeout(Duration::from_secs(5), link.wait()).await.unwrap();
        assert_eq!(outcome, Outcome::Succeeded);
    }

    #[tokio::test]
    async fn test_wait_on_completed_link_returns_immediately() {
        let link = DependencyLink::new();
        link.mark_completed(Outcome::Cancelled);
        let outcome = timeout(Duration::from_secs(1), link.wait()).await.unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
    }

    #[test]
    fn test_wait_blocking() {
        let link = DependencyLink::new();
        let waiter = link.clone();
        let handle = thread::spawn(move || waiter.wait_blocking());
        link.mark_completed(Outcome::Succeeded);
        assert_eq!(handle.join().unwrap(), Outcome::Succeeded);
    }
}
