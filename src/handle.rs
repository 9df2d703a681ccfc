//! Task handles: lifecycle, batching and completion

use std::fmt;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::config::validate_batch_size;
use crate::error::{SchedulerError, TaskError};
use crate::link::{DependencyLink, OneShot, Outcome, TaskFailure};
use crate::pool::{lock, ExecutorPool};
use crate::task::{PairedTask, Task};
use crate::tracker::TrackedHandle;

const CREATED: u8 = 0;
const SCHEDULED: u8 = 1;
const COMPLETED: u8 = 2;
const CANCELLED: u8 = 3;

/// Lifecycle state of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Built, no batches submitted
    Created,
    /// Batches submitted, not all finished
    Scheduled,
    /// All batches finished
    Completed,
    /// Never ran to completion
    Cancelled,
}

impl HandleState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            CREATED => HandleState::Created,
            SCHEDULED => HandleState::Scheduled,
            COMPLETED => HandleState::Completed,
            _ => HandleState::Cancelled,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, HandleState::Completed | HandleState::Cancelled)
    }
}

/// Identifies a handle within its scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(pub(crate) u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Data plus body of a handle, addressed by element index
pub(crate) trait Work: Send + Sync + 'static {
    fn len(&self) -> usize;
    fn run(&self, index: usize) -> Result<(), TaskError>;
}

pub(crate) struct SingleWork<T, F> {
    item: T,
    task: F,
}

impl<T, F> SingleWork<T, F> {
    pub(crate) fn new(item: T, task: F) -> Self {
        Self { item, task }
    }
}

impl<T, F> Work for SingleWork<T, F>
where
    T: Send + Sync + 'static,
    F: Task<T> + 'static,
{
    fn len(&self) -> usize {
        1
    }

    fn run(&self, _index: usize) -> Result<(), TaskError> {
        self.task.execute(&self.item)
    }
}

pub(crate) struct ArrayWork<T, F> {
    items: Vec<T>,
    task: F,
}

impl<T, F> ArrayWork<T, F> {
    pub(crate) fn new(items: Vec<T>, task: F) -> Self {
        Self { items, task }
    }
}

impl<T, F> Work for ArrayWork<T, F>
where
    T: Send + Sync + 'static,
    F: Task<T> + 'static,
{
    fn len(&self) -> usize {
        self.items.len()
    }

    fn run(&self, index: usize) -> Result<(), TaskError> {
        self.task.execute(&self.items[index])
    }
}

pub(crate) struct PairedWork<A, B, F> {
    left: Vec<A>,
    right: Vec<B>,
    task: F,
}

impl<A, B, F> PairedWork<A, B, F> {
    /// Fails unless both arrays have the same length.
    pub(crate) fn new(left: Vec<A>, right: Vec<B>, task: F) -> Result<Self, SchedulerError> {
        if left.len() != right.len() {
            return Err(SchedulerError::LengthMismatch {
                left: left.len(),
                right: right.len(),
            });
        }
        Ok(Self { left, right, task })
    }
}

impl<A, B, F> Work for PairedWork<A, B, F>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    F: PairedTask<A, B> + 'static,
{
    fn len(&self) -> usize {
        self.left.len()
    }

    fn run(&self, index: usize) -> Result<(), TaskError> {
        self.task.execute(&self.left[index], &self.right[index])
    }
}

/// Splits `[0, len)` into contiguous ranges of at most `batch_size` elements.
///
/// Produces `ceil(len / batch_size)` ranges in index order; only the last one
/// may be shorter. Fails with [`SchedulerError::InvalidBatchSize`] when
/// `batch_size` is zero.
pub fn batch_ranges(len: usize, batch_size: usize) -> Result<Vec<Range<usize>>, SchedulerError> {
    validate_batch_size(batch_size)?;
    Ok(partition(len, batch_size))
}

/// `batch_ranges` for a batch size already validated at construction
fn partition(len: usize, batch_size: usize) -> Vec<Range<usize>> {
    (0..len)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(len))
        .collect()
}

pub(crate) struct HandleCore {
    id: HandleId,
    state: AtomicU8,
    remaining: AtomicUsize,
    rejected: AtomicBool,
    batch_size: usize,
    work: Box<dyn Work>,
    failures: Mutex<Vec<TaskFailure>>,
    pub(crate) scheduled: OneShot<usize>,
    pub(crate) completion: DependencyLink,
    pool: Arc<ExecutorPool>,
}

impl HandleCore {
    fn run_batch(&self, range: Range<usize>) {
        let mut failed = Vec::new();
        for index in range {
            let result = match panic::catch_unwind(AssertUnwindSafe(|| self.work.run(index))) {
                Ok(result) => result,
                Err(payload) => Err(TaskError::from_panic(payload)),
            };
            if let Err(error) = result {
                debug!("Handle {} element {} failed: {}", self.id, index, error);
                failed.push(TaskFailure { index, error });
            }
        }
        if !failed.is_empty() {
            lock(&self.failures).extend(failed);
        }
        self.finish_batches(1);
    }

    /// Counts `n` batches as done; the call that brings the counter to zero
    /// performs the terminal transition.
    fn finish_batches(&self, n: usize) {
        if self.remaining.fetch_sub(n, Ordering::AcqRel) == n {
            self.finish();
        }
    }

    fn finish(&self) {
        let outcome = if self.rejected.load(Ordering::Acquire) {
            Outcome::Cancelled
        } else {
            let mut failures = std::mem::take(&mut *lock(&self.failures));
            if failures.is_empty() {
                Outcome::Succeeded
            } else {
                failures.sort_by_key(|f| f.index);
                Outcome::Failed(Arc::new(failures))
            }
        };

        let terminal = if outcome.is_cancelled() {
            CANCELLED
        } else {
            COMPLETED
        };
        self.state.store(terminal, Ordering::Release);
        debug!("Handle {} finished: {:?}", self.id, outcome);
        self.completion.mark_completed(outcome);
    }
}

impl Drop for HandleCore {
    fn drop(&mut self) {
        let state = HandleState::from_raw(*self.state.get_mut());
        if !state.is_terminal() && self.completion.mark_completed(Outcome::Cancelled) {
            warn!("Handle {} dropped before completion, cancelled", self.id);
        }
    }
}

/// One scheduled unit of work: a single item, an array, or a paired array.
///
/// Cloning yields another reference to the same handle.
#[derive(Clone)]
pub struct TaskHandle {
    core: Arc<HandleCore>,
}

impl TaskHandle {
    pub(crate) fn new(
        id: HandleId,
        work: impl Work,
        batch_size: usize,
        pool: Arc<ExecutorPool>,
    ) -> Self {
        debug_assert!(batch_size > 0, "batch size must be positive");
        Self {
            core: Arc::new(HandleCore {
                id,
                state: AtomicU8::new(CREATED),
                remaining: AtomicUsize::new(0),
                rejected: AtomicBool::new(false),
                batch_size,
                work: Box::new(work),
                failures: Mutex::new(Vec::new()),
                scheduled: OneShot::new(),
                completion: DependencyLink::new(),
                pool,
            }),
        }
    }

    pub fn id(&self) -> HandleId {
        self.core.id
    }

    pub fn state(&self) -> HandleState {
        HandleState::from_raw(self.core.state.load(Ordering::Acquire))
    }

    /// Number of data elements
    pub fn len(&self) -> usize {
        self.core.work.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_size(&self) -> usize {
        self.core.batch_size
    }

    /// Number of batches the handle splits into when scheduled
    pub fn batch_count(&self) -> usize {
        self.len().div_ceil(self.core.batch_size)
    }

    /// The handle's completion signal
    pub fn completion(&self) -> DependencyLink {
        self.core.completion.clone()
    }

    /// Submits the handle's batches to the pool.
    ///
    /// Only the first call moves the handle out of `Created`; every other call
    /// returns `false` without side effects. Batches the pool refuses are
    /// counted as finished and the handle ends `Cancelled`.
    pub fn schedule(&self) -> bool {
        let core = &self.core;
        if core
            .state
            .compare_exchange(CREATED, SCHEDULED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let ranges = partition(core.work.len(), core.batch_size);
        let total = ranges.len();
        core.remaining.store(total, Ordering::Release);
        debug!(
            "Handle {} scheduled: {} elements in {} batches",
            core.id,
            core.work.len(),
            total
        );
        core.scheduled.complete(total);

        if total == 0 {
            core.finish();
            return true;
        }

        for (submitted, range) in ranges.into_iter().enumerate() {
            let batch_core = Arc::clone(core);
            if let Err(e) = core.pool.submit(move || batch_core.run_batch(range)) {
                let refused = total - submitted;
                warn!(
                    "Handle {}: pool refused {} of {} batches: {}",
                    core.id, refused, total, e
                );
                core.rejected.store(true, Ordering::Release);
                core.finish_batches(refused);
                break;
            }
        }
        true
    }

    /// Moves a never-scheduled handle straight to `Cancelled`.
    pub(crate) fn cancel(&self) -> bool {
        let core = &self.core;
        if core
            .state
            .compare_exchange(CREATED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        warn!("Handle {} cancelled before scheduling", core.id);
        core.completion.mark_completed(Outcome::Cancelled);
        true
    }

    /// Reacts to the dependency's outcome: schedule, or cancel when the
    /// dependency itself was cancelled.
    pub(crate) fn resolve_dependency(&self, outcome: &Outcome) {
        if outcome.is_cancelled() {
            self.cancel();
        } else {
            self.schedule();
        }
    }

    pub(crate) fn tracked(&self) -> TrackedHandle<'_> {
        TrackedHandle::new(&self.core)
    }
}

impl HandleCore {
    pub(crate) fn id(&self) -> HandleId {
        self.id
    }

    pub(crate) fn len(&self) -> usize {
        self.work.len()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("len", &self.len())
            .field("batch_size", &self.batch_size())
            .finish()
    }
}
