//! Scheduler configuration

use crate::error::SchedulerError;

/// Batch size used by array scheduling when the caller does not pick one.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Configuration for a [`TaskScheduler`](crate::TaskScheduler).
///
/// The worker thread count has no default and must be chosen explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of worker threads in the executor pool.
    pub worker_threads: usize,
    /// Batch size for array scheduling when none is given per call.
    pub default_batch_size: usize,
}

impl SchedulerConfig {
    /// Creates a config with the given worker count and the default batch size
    pub fn new(worker_threads: usize) -> Self {
        Self {
            worker_threads,
            default_batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Sets the default batch size
    pub fn with_default_batch_size(mut self, batch_size: usize) -> Self {
        self.default_batch_size = batch_size;
        self
    }

    /// Rejects zero thread counts and zero batch sizes.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.worker_threads == 0 {
            return Err(SchedulerError::InvalidThreadCount(self.worker_threads));
        }
        validate_batch_size(self.default_batch_size)
    }
}

pub(crate) fn validate_batch_size(batch_size: usize) -> Result<(), SchedulerError> {
    if batch_size == 0 {
        return Err(SchedulerError::InvalidBatchSize(batch_size));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_default_batch_size() {
        let config = SchedulerConfig::new(7);
        assert_eq!(config.worker_threads, 7);
        assert_eq!(config.default_batch_size, DEFAULT_BATCH_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let err = SchedulerConfig::new(0).validate().unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidThreadCount(0)));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = SchedulerConfig::new(2)
            .with_default_batch_size(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidBatchSize(0)));
    }
}
