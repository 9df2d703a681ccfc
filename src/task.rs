//! Task bodies executed by the scheduler

use crate::error::TaskError;

/// A body executed once per data element.
///
/// One instance is shared by every batch of a handle and may be invoked from
/// several worker threads at once. Closures `Fn(&T)` implement this trait and
/// report failure by panicking; explicit implementations can return an error.
pub trait Task<T>: Send + Sync {
    fn execute(&self, item: &T) -> Result<(), TaskError>;
}

impl<T, F> Task<T> for F
where
    F: Fn(&T) + Send + Sync,
{
    fn execute(&self, item: &T) -> Result<(), TaskError> {
        self(item);
        Ok(())
    }
}

/// A body executed once per index over two equally long arrays
pub trait PairedTask<A, B>: Send + Sync {
    fn execute(&self, left: &A, right: &B) -> Result<(), TaskError>;
}

impl<A, B, F> PairedTask<A, B> for F
where
    F: Fn(&A, &B) + Send + Sync,
{
    fn execute(&self, left: &A, right: &B) -> Result<(), TaskError> {
        self(left, right);
        Ok(())
    }
}
