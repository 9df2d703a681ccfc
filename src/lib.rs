//! # Task Chain Scheduler
//!
//! An in-process scheduler that runs single items and batched arrays on a
//! fixed pool of worker threads, chaining tasks through one-shot completion
//! signals.
//!
//! ## Key Features
//!
//! - **Batching**: array work is split into contiguous batches that run
//!   concurrently on the pool
//! - **Event-driven chaining**: a dependent task is scheduled by a
//!   continuation on its dependency's [`DependencyLink`], never by polling
//! - **Exactly-once notification**: continuations and trackers fire once,
//!   whether they subscribe before or after completion
//! - **Failure isolation**: failing or panicking task bodies are reported in
//!   the [`Outcome`] and never stall the chain

pub mod config;
pub mod error;
pub mod handle;
pub mod link;
pub mod mock;
pub mod pool;
pub mod scheduler;
pub mod task;
pub mod tracker;

pub use config::{SchedulerConfig, DEFAULT_BATCH_SIZE};
pub use error::{SchedulerError, TaskError};
pub use handle::{batch_ranges, HandleId, HandleState, TaskHandle};
pub use link::{DependencyLink, Outcome, SubscriberId, TaskFailure};
pub use mock::{generate_mock_chain, MockStage, StageKind};
pub use pool::ExecutorPool;
pub use scheduler::{ScheduleOptions, TaskScheduler};
pub use task::{PairedTask, Task};
pub use tracker::{EventLog, LifecycleEvent, LoggingTracker, TrackedHandle, Tracker};
