//! Lifecycle observers attached to handles before they are scheduled

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::handle::{HandleCore, HandleId};
use crate::link::Outcome;
use crate::pool::lock;

/// A handle as seen by a tracker: identity plus lifecycle subscriptions.
///
/// Callbacks registered here fire exactly once, even when the event already
/// happened by the time they are registered.
pub struct TrackedHandle<'a> {
    core: &'a HandleCore,
}

impl<'a> TrackedHandle<'a> {
    pub(crate) fn new(core: &'a HandleCore) -> Self {
        Self { core }
    }

    pub fn id(&self) -> HandleId {
        self.core.id()
    }

    /// Number of data elements
    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `callback` with the batch count once the handle is scheduled.
    /// Never fires for a handle cancelled before scheduling.
    pub fn on_scheduled<F>(&self, callback: F)
    where
        F: FnOnce(usize) + Send + 'static,
    {
        self.core.scheduled.subscribe(move |batches| callback(*batches));
    }

    /// Runs `callback` with the terminal outcome
    pub fn on_completed<F>(&self, callback: F)
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        self.core.completion.subscribe(callback);
    }
}

/// An external observer of handle lifecycles
pub trait Tracker: Send + Sync {
    /// Called once per handle, before any attempt to schedule it
    fn track(&self, handle: &TrackedHandle<'_>);
}

impl<A: Tracker, B: Tracker> Tracker for (A, B) {
    fn track(&self, handle: &TrackedHandle<'_>) {
        self.0.track(handle);
        self.1.track(handle);
    }
}

impl<T: Tracker + ?Sized> Tracker for Arc<T> {
    fn track(&self, handle: &TrackedHandle<'_>) {
        (**self).track(handle);
    }
}

/// A lifecycle event recorded by [`EventLog`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Tracked { handle: HandleId, len: usize },
    Scheduled { handle: HandleId, batches: usize },
    Completed { handle: HandleId, outcome: Outcome },
}

impl LifecycleEvent {
    pub fn handle(&self) -> HandleId {
        match self {
            LifecycleEvent::Tracked { handle, .. }
            | LifecycleEvent::Scheduled { handle, .. }
            | LifecycleEvent::Completed { handle, .. } => *handle,
        }
    }
}

/// Tracker that records every event in arrival order.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events
    pub fn events(&self) -> Vec<LifecycleEvent> {
        lock(&self.events).clone()
    }

    /// Recorded events for one handle
    pub fn events_for(&self, handle: HandleId) -> Vec<LifecycleEvent> {
        lock(&self.events)
            .iter()
            .filter(|e| e.handle() == handle)
            .cloned()
            .collect()
    }

    fn push(events: &Mutex<Vec<LifecycleEvent>>, event: LifecycleEvent) {
        lock(events).push(event);
    }
}

impl Tracker for EventLog {
    fn track(&self, handle: &TrackedHandle<'_>) {
        let id = handle.id();
        Self::push(
            &self.events,
            LifecycleEvent::Tracked {
                handle: id,
                len: handle.len(),
            },
        );

        let events = Arc::clone(&self.events);
        handle.on_scheduled(move |batches| {
            Self::push(&events, LifecycleEvent::Scheduled { handle: id, batches });
        });

        let events = Arc::clone(&self.events);
        handle.on_completed(move |outcome| {
            Self::push(
                &events,
                LifecycleEvent::Completed {
                    handle: id,
                    outcome: outcome.clone(),
                },
            );
        });
    }
}

/// Tracker that reports lifecycle events through `tracing`
#[derive(Debug, Clone, Default)]
pub struct LoggingTracker {
    label: Option<String>,
}

impl LoggingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefixes every message with `label`
    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }
}

impl Tracker for LoggingTracker {
    fn track(&self, handle: &TrackedHandle<'_>) {
        let id = handle.id();
        let label = self.label.clone().unwrap_or_else(|| "task".to_string());

        let scheduled_label = label.clone();
        handle.on_scheduled(move |batches| {
            info!("[{}] Handle {} scheduled in {} batches", scheduled_label, id, batches);
        });
        handle.on_completed(move |outcome| match outcome {
            Outcome::Succeeded => info!("[{}] Handle {} completed", label, id),
            Outcome::Failed(failures) => info!(
                "[{}] Handle {} completed with {} failures",
                label,
                id,
                failures.len()
            ),
            Outcome::Cancelled => info!("[{}] Handle {} cancelled", label, id),
        });
    }
}
