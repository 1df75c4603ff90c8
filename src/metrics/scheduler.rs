// Scheduler metrics
//
// Every scheduler owns its own registry so that several schedulers in one
// process never share or clobber counters.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Counters for one scheduler instance.
#[derive(Clone)]
pub struct SchedulerMetrics {
    registry: Registry,
    pub(crate) submitted: IntCounter,
    pub(crate) rejected: IntCounterVec,
    pub(crate) completed: IntCounter,
    pub(crate) panicked: IntCounter,
    pub(crate) dropped: IntCounter,
    pub(crate) migrated: IntCounter,
    pub(crate) pending: IntGauge,
}

impl SchedulerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let submitted = IntCounter::new(
            "lanes_tasks_submitted_total",
            "Tasks accepted into an intake queue",
        )?;
        let rejected = IntCounterVec::new(
            Opts::new(
                "lanes_submit_rejected_total",
                "Submissions refused, by reason",
            ),
            &["reason"],
        )?;
        let completed = IntCounter::new(
            "lanes_tasks_completed_total",
            "Tasks that ran to completion without panicking",
        )?;
        let panicked = IntCounter::new(
            "lanes_tasks_panicked_total",
            "Tasks whose execution panicked",
        )?;
        let dropped = IntCounter::new(
            "lanes_tasks_dropped_total",
            "Accepted tasks discarded between stages by cancellation",
        )?;
        let migrated = IntCounter::new(
            "lanes_tasks_migrated_total",
            "Tasks handed to a worker through the shared overflow queue",
        )?;
        let pending = IntGauge::new(
            "lanes_pending_tasks",
            "Queued plus in-flight tasks at the last render",
        )?;

        registry.register(Box::new(submitted.clone()))?;
        registry.register(Box::new(rejected.clone()))?;
        registry.register(Box::new(completed.clone()))?;
        registry.register(Box::new(panicked.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(migrated.clone()))?;
        registry.register(Box::new(pending.clone()))?;

        Ok(Self {
            registry,
            submitted,
            rejected,
            completed,
            panicked,
            dropped,
            migrated,
            pending,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.get()
    }

    pub fn rejected(&self, reason: &str) -> u64 {
        self.rejected.with_label_values(&[reason]).get()
    }

    pub fn completed(&self) -> u64 {
        self.completed.get()
    }

    pub fn panicked(&self) -> u64 {
        self.panicked.get()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }

    pub fn migrated(&self) -> u64 {
        self.migrated.get()
    }

    /// Render all collectors in the Prometheus text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for SchedulerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerMetrics")
            .field("submitted", &self.submitted.get())
            .field("completed", &self.completed.get())
            .field("panicked", &self.panicked.get())
            .field("dropped", &self.dropped.get())
            .field("migrated", &self.migrated.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_start_at_zero() {
        let metrics = SchedulerMetrics::new().unwrap();
        assert_eq!(metrics.submitted(), 0);
        assert_eq!(metrics.rejected("timeout"), 0);
        assert_eq!(metrics.completed(), 0);
        assert_eq!(metrics.dropped(), 0);
    }

    #[test]
    fn test_two_instances_do_not_share_counters() {
        let a = SchedulerMetrics::new().unwrap();
        let b = SchedulerMetrics::new().unwrap();
        a.submitted.inc();
        assert_eq!(a.submitted(), 1);
        assert_eq!(b.submitted(), 0);
    }

    #[test]
    fn test_render_contains_counters() {
        let metrics = SchedulerMetrics::new().unwrap();
        metrics.rejected.with_label_values(&["timeout"]).inc();
        let text = metrics.render().unwrap();
        assert!(text.contains("lanes_tasks_submitted_total 0"));
        assert!(text.contains("lanes_submit_rejected_total{reason=\"timeout\"} 1"));
    }
}
