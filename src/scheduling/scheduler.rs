// Lane pool: owns the per-lane task queues, the shared overflow queue, and the
// cancellation signal every forwarder and worker watches

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument};

use super::channel::Channel;
use super::error::{SchedulerError, SubmitError};
use super::queue::{LaneShared, TaskQueue};
use super::status::{StatusSnapshot, TaskFailure};
use super::task::BoxTask;
use crate::config::SchedulerSettings;
use crate::metrics::SchedulerMetrics;

/// Default time `submit` waits for intake capacity.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Multi-lane task dispatcher.
///
/// Each lane has a bounded intake queue drained by a dedicated forwarder,
/// which hands tasks to the lane's own worker when it is idle and otherwise
/// to whichever worker in the pool frees up first. Within one lane tasks
/// leave intake in FIFO order; a task that goes through the shared overflow
/// queue has no ordering relative to other lanes.
///
/// The forwarders and workers (two per lane) run until the cancellation
/// token passed to [`Scheduler::new`] fires or the scheduler is dropped.
/// Tasks sitting between stages at that moment are dropped without running,
/// so a successful [`submit`](Scheduler::submit) means "accepted for
/// best-effort execution", not "will complete".
pub struct Scheduler {
    queues: Vec<TaskQueue>,
    shared: Arc<LaneShared>,
    tracker: TaskTracker,
    queue_size: usize,
    submit_timeout: Duration,
}

impl Scheduler {
    /// Create a scheduler with `lanes` lanes whose intake queues hold up to
    /// `queue_size` tasks each, and start its forwarders and workers on the
    /// current Tokio runtime.
    ///
    /// A `queue_size` of 0 makes every intake queue a rendezvous: `submit`
    /// only succeeds once the lane's forwarder is ready to take the task.
    #[instrument(skip(cancel))]
    pub fn new(
        cancel: CancellationToken,
        lanes: usize,
        queue_size: usize,
    ) -> Result<Self, SchedulerError> {
        if lanes == 0 {
            return Err(SchedulerError::NoLanes);
        }
        let runtime = Handle::try_current()?;
        let metrics = SchedulerMetrics::new()?;
        let (last_failure, _) = watch::channel(None);

        let shared = Arc::new(LaneShared {
            overflow: Channel::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            last_failure,
            metrics,
            // A child token lets `Drop` stop our units without cancelling the caller's token.
            cancel: cancel.child_token(),
        });

        let tracker = TaskTracker::new();
        let queues: Vec<TaskQueue> = (0..lanes)
            .map(|lane| TaskQueue::new(lane, queue_size))
            .collect();
        for queue in &queues {
            queue.start(&shared, &tracker, &runtime);
        }
        tracker.close();

        info!(lanes, queue_size, "Scheduler started");

        Ok(Self {
            queues,
            shared,
            tracker,
            queue_size,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
        })
    }

    /// Create a scheduler from the `[scheduler]` configuration section.
    pub fn from_settings(
        cancel: CancellationToken,
        settings: &SchedulerSettings,
    ) -> Result<Self, SchedulerError> {
        let mut scheduler = Self::new(cancel, settings.lanes, settings.queue_size)?;
        scheduler.set_submit_timeout(settings.submit_timeout());
        Ok(scheduler)
    }

    /// Set how long `submit` waits for intake capacity. Taking `&mut self`
    /// means this can only happen before the scheduler is shared.
    pub fn set_submit_timeout(&mut self, timeout: Duration) {
        self.submit_timeout = timeout;
    }

    pub fn submit_timeout(&self) -> Duration {
        self.submit_timeout
    }

    pub fn lane_count(&self) -> usize {
        self.queues.len()
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    /// The token handed to running tasks. Fires when the caller's token
    /// fires or the scheduler is dropped.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.shared.cancel
    }

    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.shared.metrics
    }

    /// Enqueue `task` onto lane `lane`'s intake queue.
    ///
    /// Waits at most the submit timeout for capacity. Returns
    /// [`SubmitError::Cancelled`] if the scheduler is (or becomes) cancelled
    /// first and [`SubmitError::Timeout`] if the timeout elapses first; both
    /// hand the task back.
    ///
    /// # Panics
    ///
    /// Panics if `lane >= self.lane_count()`.
    pub async fn submit(&self, task: BoxTask, lane: usize) -> Result<(), SubmitError<BoxTask>> {
        assert!(
            lane < self.queues.len(),
            "lane index {lane} out of range for {} lanes",
            self.queues.len()
        );

        let result = self.enqueue(task, lane).await;
        match &result {
            Ok(()) => self.shared.metrics.submitted.inc(),
            Err(err) => {
                self.shared
                    .metrics
                    .rejected
                    .with_label_values(&[err.reason()])
                    .inc();
                debug!(lane, reason = err.reason(), "Submission rejected");
            }
        }
        result
    }

    /// Submit to the lane [`load_hint`](Scheduler::load_hint) picks.
    pub async fn submit_balanced(&self, task: BoxTask) -> Result<(), SubmitError<BoxTask>> {
        let lane = self.load_hint();
        self.submit(task, lane).await
    }

    async fn enqueue(&self, mut task: BoxTask, lane: usize) -> Result<(), SubmitError<BoxTask>> {
        if self.shared.cancel.is_cancelled() {
            return Err(SubmitError::Cancelled(task));
        }

        let intake = self.queues[lane].intake();
        let deadline = tokio::time::sleep_until(Instant::now() + self.submit_timeout);
        tokio::pin!(deadline);

        loop {
            let changed = intake.changed();
            tokio::pin!(changed);
            changed.as_mut().enable();

            match intake.try_send(task) {
                Ok(()) => return Ok(()),
                Err(returned) => task = returned,
            }

            tokio::select! {
                _ = self.shared.cancel.cancelled() => return Err(SubmitError::Cancelled(task)),
                _ = &mut deadline => return Err(SubmitError::Timeout(task)),
                _ = &mut changed => {}
            }
        }
    }

    /// Lane whose intake queue currently holds the fewest tasks, lowest index
    /// on ties.
    ///
    /// Lanes are sampled one after another without a global lock, so the
    /// answer can be stale by the time the caller submits. It is a routing
    /// hint, not a balance guarantee.
    pub fn load_hint(&self) -> usize {
        self.queues
            .iter()
            .enumerate()
            .min_by_key(|(_, queue)| queue.depth())
            .map_or(0, |(lane, _)| lane)
    }

    /// Fresh snapshot of lane/queue sizes, pending work, and the last task panic.
    pub fn status(&self) -> StatusSnapshot {
        let lane_depths: Vec<usize> = self.queues.iter().map(TaskQueue::depth).collect();
        let pending_tasks =
            lane_depths.iter().sum::<usize>() + self.shared.in_flight.load(Ordering::SeqCst);

        StatusSnapshot {
            lane_count: self.queues.len(),
            queue_size: self.queue_size,
            pending_tasks,
            lane_depths,
            last_failure: self.shared.last_failure.borrow().clone(),
        }
    }

    /// Watch the last observed task failure; the receiver is notified each
    /// time a worker records a new one.
    pub fn failures(&self) -> watch::Receiver<Option<TaskFailure>> {
        self.shared.last_failure.subscribe()
    }

    /// Refresh the pending gauge and render metrics in text exposition format.
    pub fn render_metrics(&self) -> prometheus::Result<String> {
        let pending = self.status().pending_tasks;
        self.shared
            .metrics
            .pending
            .set(i64::try_from(pending).unwrap_or(i64::MAX));
        self.shared.metrics.render()
    }

    /// Wait until every forwarder and worker has exited.
    ///
    /// Only resolves after cancellation has fired.
    pub async fn wait(&self) {
        self.tracker.wait().await;
        info!("Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("lanes", &self.queues.len())
            .field("queue_size", &self.queue_size)
            .field("submit_timeout", &self.submit_timeout)
            .field("cancelled", &self.shared.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
