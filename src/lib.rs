// Lanes - multi-lane task dispatch with cross-lane work sharing
// Library exports

pub mod config;
pub mod logging;
pub mod metrics;
pub mod scheduling;

pub use scheduling::{
    BoxTask, Scheduler, SchedulerError, Sequence, SequenceError, StatusSnapshot, SubmitError,
    Task, TaskFailure,
};
