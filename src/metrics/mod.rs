// Metrics module
// Per-scheduler Prometheus collectors

mod scheduler;

pub use scheduler::SchedulerMetrics;
