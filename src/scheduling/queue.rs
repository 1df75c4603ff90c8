// Per-lane task queue: bounded intake, zero-capacity handoff, and the
// forwarder/worker pair that drains them
//
// Flow for lane i:
//   submit -> intake[i] -> forwarder[i] -> handoff[i] -> worker[i]
//                                      \-> overflow  -> any idle worker
//
// A task counts as in flight from the moment it leaves intake (popped by the
// forwarder, or handed straight into the forwarder's parked slot) until a
// worker accepts it.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use super::channel::{Channel, Slot};
use super::status::TaskFailure;
use super::task::BoxTask;
use crate::metrics::SchedulerMetrics;

/// State shared by every lane of one scheduler.
pub(crate) struct LaneShared {
    /// Rendezvous queue any forwarder may hand to and any idle worker may take from.
    pub(crate) overflow: Channel<BoxTask>,
    pub(crate) in_flight: Arc<AtomicUsize>,
    pub(crate) last_failure: watch::Sender<Option<TaskFailure>>,
    pub(crate) metrics: SchedulerMetrics,
    pub(crate) cancel: CancellationToken,
}

/// One lane: its intake queue, its handoff queue, and (once started) one
/// forwarder and one worker.
pub(crate) struct TaskQueue {
    lane: usize,
    intake: Channel<BoxTask>,
    handoff: Channel<BoxTask>,
}

impl TaskQueue {
    pub(crate) fn new(lane: usize, queue_size: usize) -> Self {
        Self {
            lane,
            intake: Channel::new(queue_size),
            handoff: Channel::new(0),
        }
    }

    pub(crate) fn intake(&self) -> &Channel<BoxTask> {
        &self.intake
    }

    /// Tasks currently waiting in intake.
    pub(crate) fn depth(&self) -> usize {
        self.intake.len()
    }

    /// Spawn this lane's forwarder and worker.
    pub(crate) fn start(&self, shared: &Arc<LaneShared>, tracker: &TaskTracker, runtime: &Handle) {
        tracker.spawn_on(
            forward(
                self.lane,
                self.intake.clone(),
                self.handoff.clone(),
                Arc::clone(shared),
            ),
            runtime,
        );
        tracker.spawn_on(
            work(self.lane, self.handoff.clone(), Arc::clone(shared)),
            runtime,
        );
    }
}

/// Releases a task's place in the in-flight count when dropped. The count
/// itself is taken by the counted intake slot.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn adopt(counter: &'a AtomicUsize) -> Self {
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn forward(
    lane: usize,
    intake: Channel<BoxTask>,
    handoff: Channel<BoxTask>,
    shared: Arc<LaneShared>,
) {
    debug!(lane, "forwarder started");
    while !shared.cancel.is_cancelled() {
        let (slot, mut delivered) = Slot::counted(&shared.in_flight);
        let task = match intake.take_or_park(&slot) {
            Some(task) => task,
            None => tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => {
                    // A submitter may have filled the slot just before cancellation.
                    delivered.close();
                    if let Ok(task) = delivered.try_recv() {
                        let _in_flight = InFlight::adopt(&shared.in_flight);
                        drop(task);
                        shared.metrics.dropped.inc();
                        debug!(lane, "cancelled with a task taken from intake; task dropped");
                    }
                    break;
                }
                task = &mut delivered => match task {
                    Ok(task) => task,
                    Err(_) => continue,
                },
            },
        };

        let in_flight = InFlight::adopt(&shared.in_flight);
        let handed = hand_off(lane, task, &handoff, &shared).await;
        drop(in_flight);

        if let Err(task) = handed {
            drop(task);
            shared.metrics.dropped.inc();
            debug!(lane, "cancelled while holding a task; task dropped");
            break;
        }
    }
    debug!(lane, "forwarder stopped");
}

/// Give `task` to a worker: this lane's own worker if it is idle right now,
/// otherwise whichever of our worker or the overflow queue is ready first.
/// Returns the task if cancellation fires before anyone takes it.
async fn hand_off(
    lane: usize,
    mut task: BoxTask,
    handoff: &Channel<BoxTask>,
    shared: &LaneShared,
) -> Result<(), BoxTask> {
    match handoff.try_send(task) {
        Ok(()) => return Ok(()),
        Err(returned) => task = returned,
    }

    loop {
        let own_ready = handoff.changed();
        let any_ready = shared.overflow.changed();
        tokio::pin!(own_ready);
        tokio::pin!(any_ready);
        own_ready.as_mut().enable();
        any_ready.as_mut().enable();

        match handoff.try_send(task) {
            Ok(()) => return Ok(()),
            Err(returned) => task = returned,
        }
        match shared.overflow.try_send(task) {
            Ok(()) => {
                shared.metrics.migrated.inc();
                trace!(lane, "task handed off through overflow");
                return Ok(());
            }
            Err(returned) => task = returned,
        }

        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return Err(task),
            _ = &mut own_ready => {}
            _ = &mut any_ready => {}
        }
    }
}

async fn work(lane: usize, handoff: Channel<BoxTask>, shared: Arc<LaneShared>) {
    debug!(lane, "worker started");
    while !shared.cancel.is_cancelled() {
        // One claim, parked on both queues; our own lane's queue first.
        let (slot, mut accepted) = Slot::new();
        handoff.park(&slot);
        shared.overflow.park(&slot);

        let task = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => {
                // A forwarder may have filled the slot just before cancellation.
                accepted.close();
                if accepted.try_recv().is_ok() {
                    shared.metrics.dropped.inc();
                    debug!(lane, "cancelled with a task handed over; task dropped");
                }
                break;
            }
            task = &mut accepted => match task {
                Ok(task) => task,
                Err(_) => continue,
            },
        };

        run_isolated(lane, task, &shared).await;
    }
    debug!(lane, "worker stopped");
}

/// Run one task, turning a panic into the scheduler's last observed failure.
async fn run_isolated(lane: usize, task: BoxTask, shared: &LaneShared) {
    let outcome = AssertUnwindSafe(task.run(shared.cancel.clone()))
        .catch_unwind()
        .await;

    match outcome {
        Ok(()) => {
            shared.metrics.completed.inc();
            trace!(lane, "task completed");
        }
        Err(payload) => {
            let failure = TaskFailure::from_panic(lane, payload.as_ref());
            warn!(lane, message = %failure.message, "task panicked");
            shared.metrics.panicked.inc();
            shared.last_failure.send_replace(Some(failure));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn shared() -> Arc<LaneShared> {
        let (last_failure, _) = watch::channel(None);
        Arc::new(LaneShared {
            overflow: Channel::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            last_failure,
            metrics: SchedulerMetrics::new().unwrap(),
            cancel: CancellationToken::new(),
        })
    }

    #[test]
    fn test_in_flight_guard_releases_adopted_count() {
        let counter = AtomicUsize::new(2);
        {
            let _a = InFlight::adopt(&counter);
            let _b = InFlight::adopt(&counter);
            assert_eq!(counter.load(Ordering::SeqCst), 2);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hand_off_prefers_own_idle_worker() {
        let shared = shared();
        let handoff = Channel::new(0);
        let (slot, rx) = Slot::new();
        handoff.park(&slot);

        let task: BoxTask = Box::new(|_cancel: CancellationToken| async {});
        assert!(hand_off(0, task, &handoff, &shared).await.is_ok());
        assert!(rx.await.is_ok());
        assert_eq!(shared.metrics.migrated(), 0);
    }

    #[tokio::test]
    async fn test_hand_off_falls_back_to_overflow() {
        let shared = shared();
        let handoff = Channel::new(0);
        let (slot, rx) = Slot::new();
        shared.overflow.park(&slot);

        let task: BoxTask = Box::new(|_cancel: CancellationToken| async {});
        assert!(hand_off(0, task, &handoff, &shared).await.is_ok());
        assert!(rx.await.is_ok());
        assert_eq!(shared.metrics.migrated(), 1);
    }

    #[tokio::test]
    async fn test_hand_off_returns_task_on_cancel() {
        let shared = shared();
        let handoff = Channel::new(0);
        let cancel = shared.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let task: BoxTask = Box::new(|_cancel: CancellationToken| async {});
        assert!(hand_off(0, task, &handoff, &shared).await.is_err());
    }

    #[tokio::test]
    async fn test_run_isolated_records_panic() {
        let shared = shared();
        let task: BoxTask = Box::new(|_cancel: CancellationToken| async {
            panic!("task exploded");
        });
        run_isolated(3, task, &shared).await;

        let failure = shared.last_failure.borrow().clone().unwrap();
        assert_eq!(failure.lane, 3);
        assert_eq!(failure.message, "task exploded");
        assert_eq!(shared.metrics.panicked(), 1);
        assert_eq!(shared.metrics.completed(), 0);
    }
}
