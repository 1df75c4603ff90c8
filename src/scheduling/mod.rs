// Multi-lane task scheduling
//
// A fixed pool of lanes, each with a bounded intake queue, a forwarder, and a
// worker. Idle workers in any lane pick up work other lanes cannot place
// locally. Also home to the sequence generator used to label work.

mod channel;
pub mod error;
mod queue;
pub mod scheduler;
pub mod sequence;
pub mod status;
pub mod task;

pub use error::{SchedulerError, SubmitError};
pub use scheduler::{Scheduler, DEFAULT_SUBMIT_TIMEOUT};
pub use sequence::{Sequence, SequenceError, DEFAULT_PREFIX_LEN, MAX_PREFIX_LEN};
pub use status::{StatusSnapshot, TaskFailure};
pub use task::{BoxTask, Task};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, ignoring poisoning. Nothing panics while these locks are held.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
