//! Scheduling entry points

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{validate_batch_size, SchedulerConfig};
use crate::error::SchedulerError;
use crate::handle::{ArrayWork, HandleId, PairedWork, SingleWork, TaskHandle};
use crate::link::DependencyLink;
use crate::pool::ExecutorPool;
use crate::task::{PairedTask, Task};
use crate::tracker::Tracker;

/// Optional arguments of a schedule call
#[derive(Default, Clone, Copy)]
pub struct ScheduleOptions<'a> {
    batch_size: Option<usize>,
    dependency: Option<&'a DependencyLink>,
    tracker: Option<&'a dyn Tracker>,
}

impl<'a> ScheduleOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the task only after `dependency` completes
    pub fn after(mut self, dependency: &'a DependencyLink) -> Self {
        self.dependency = Some(dependency);
        self
    }

    /// Registers `tracker` before the task is scheduled
    pub fn tracked_by(mut self, tracker: &'a dyn Tracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Overrides the configured batch size (array scheduling only)
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

/// Schedules single items and arrays onto a fixed worker pool, chaining
/// tasks through their [`DependencyLink`]s.
pub struct TaskScheduler {
    config: SchedulerConfig,
    pool: Arc<ExecutorPool>,
    next_id: AtomicU64,
}

impl TaskScheduler {
    /// Validates `config` and starts the worker pool
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let pool = Arc::new(ExecutorPool::new(config.worker_threads)?);
        info!(
            "Task scheduler ready ({} workers, default batch size {})",
            config.worker_threads, config.default_batch_size
        );
        Ok(Self {
            config,
            pool,
            next_id: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The underlying worker pool
    pub fn pool(&self) -> &ExecutorPool {
        &self.pool
    }

    /// Schedules `task` over one data item
    pub fn schedule_single<T, F>(
        &self,
        data: T,
        task: F,
        options: ScheduleOptions<'_>,
    ) -> Result<DependencyLink, SchedulerError>
    where
        T: Send + Sync + 'static,
        F: Task<T> + 'static,
    {
        let handle = self.single_handle(data, task)?;
        self.submit(&handle, options)
    }

    /// Schedules `task` over every element of `data`, split into batches
    pub fn schedule_array<T, F>(
        &self,
        data: Vec<T>,
        task: F,
        options: ScheduleOptions<'_>,
    ) -> Result<DependencyLink, SchedulerError>
    where
        T: Send + Sync + 'static,
        F: Task<T> + 'static,
    {
        let batch_size = options.batch_size.unwrap_or(self.config.default_batch_size);
        let handle = self.array_handle(data, task, batch_size)?;
        self.submit(&handle, options)
    }

    /// Schedules `task` over index pairs of two equally long arrays
    pub fn schedule_array_paired<A, B, F>(
        &self,
        left: Vec<A>,
        right: Vec<B>,
        task: F,
        options: ScheduleOptions<'_>,
    ) -> Result<DependencyLink, SchedulerError>
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
        F: PairedTask<A, B> + 'static,
    {
        let batch_size = options.batch_size.unwrap_or(self.config.default_batch_size);
        let handle = self.paired_handle(left, right, task, batch_size)?;
        self.submit(&handle, options)
    }

    /// Builds an unscheduled single-item handle
    pub fn single_handle<T, F>(&self, data: T, task: F) -> Result<TaskHandle, SchedulerError>
    where
        T: Send + Sync + 'static,
        F: Task<T> + 'static,
    {
        self.ensure_accepting()?;
        Ok(TaskHandle::new(
            self.next_id(),
            SingleWork::new(data, task),
            1,
            Arc::clone(&self.pool),
        ))
    }

    /// Builds an unscheduled array handle
    pub fn array_handle<T, F>(
        &self,
        data: Vec<T>,
        task: F,
        batch_size: usize,
    ) -> Result<TaskHandle, SchedulerError>
    where
        T: Send + Sync + 'static,
        F: Task<T> + 'static,
    {
        validate_batch_size(batch_size)?;
        self.ensure_accepting()?;
        Ok(TaskHandle::new(
            self.next_id(),
            ArrayWork::new(data, task),
            batch_size,
            Arc::clone(&self.pool),
        ))
    }

    /// Builds an unscheduled paired-array handle
    pub fn paired_handle<A, B, F>(
        &self,
        left: Vec<A>,
        right: Vec<B>,
        task: F,
        batch_size: usize,
    ) -> Result<TaskHandle, SchedulerError>
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
        F: PairedTask<A, B> + 'static,
    {
        validate_batch_size(batch_size)?;
        let work = PairedWork::new(left, right, task)?;
        self.ensure_accepting()?;
        Ok(TaskHandle::new(
            self.next_id(),
            work,
            batch_size,
            Arc::clone(&self.pool),
        ))
    }

    /// Stops the worker pool after draining queued batches.
    ///
    /// Later schedule calls fail with [`SchedulerError::ShutDown`]. Dependents
    /// still waiting when their dependency completes end up cancelled.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    /// Tracks, then wires the handle to its dependency or schedules it.
    ///
    /// With a dependency, the continuation is registered before the
    /// dependency is probed; both paths may fire and `schedule` keeps only the
    /// first.
    fn submit(
        &self,
        handle: &TaskHandle,
        options: ScheduleOptions<'_>,
    ) -> Result<DependencyLink, SchedulerError> {
        if let Some(tracker) = options.tracker {
            tracker.track(&handle.tracked());
        }

        let completion = handle.completion();
        match options.dependency {
            None => {
                handle.schedule();
            }
            Some(dependency) => {
                debug!("Handle {} waiting on dependency", handle.id());
                let pending = handle.clone();
                dependency.subscribe(move |outcome| pending.resolve_dependency(outcome));
                if let Some(outcome) = dependency.outcome() {
                    handle.resolve_dependency(&outcome);
                }
            }
        }
        Ok(completion)
    }

    fn ensure_accepting(&self) -> Result<(), SchedulerError> {
        if self.pool.is_accepting() {
            Ok(())
        } else {
            Err(SchedulerError::ShutDown)
        }
    }

    fn next_id(&self) -> HandleId {
        HandleId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
