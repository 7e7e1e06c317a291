//! Dispatcher components: job queue, worker pool, completion tracker, progress sink.
//!
//! Queue, completion set and pool membership each sit behind their own mutex and condvar; no
//! code path holds all three.

pub mod dispatcher;
pub mod pool;
pub mod queue;
pub mod sink;
pub mod tracker;
mod worker;

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::engine::TileCreator;

pub use dispatcher::Dispatcher;
pub use pool::WorkerPool;
pub use queue::JobQueue;
pub use sink::{NoProgress, ProgressSink};
pub use tracker::{CompletionTracker, output_path_in};

/// State shared between the facade and its workers.
pub(crate) struct Shared {
    pub(crate) queue: JobQueue,
    pub(crate) tracker: CompletionTracker,
    pub(crate) pool: WorkerPool,
    pub(crate) creator: Arc<dyn TileCreator>,
}

/// Lock, recovering from poison: a panicking collaborator must not wedge the batch.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn wait_while<'a, T, F>(cv: &Condvar, guard: MutexGuard<'a, T>, cond: F) -> MutexGuard<'a, T>
where
    F: FnMut(&mut T) -> bool,
{
    cv.wait_while(guard, cond)
        .unwrap_or_else(PoisonError::into_inner)
}
