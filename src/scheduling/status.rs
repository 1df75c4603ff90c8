// Point-in-time scheduler status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;

/// A task panic observed by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Lane of the worker that ran the task (not necessarily the lane it was
    /// submitted to, if it migrated through the overflow queue).
    pub lane: usize,
    /// Panic message.
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl TaskFailure {
    pub(crate) fn from_panic(lane: usize, payload: &(dyn Any + Send)) -> Self {
        Self {
            lane,
            message: panic_message(payload),
            occurred_at: Utc::now(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Snapshot returned by [`Scheduler::status`](super::Scheduler::status).
/// Recomputed on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub lane_count: usize,
    pub queue_size: usize,
    /// Tasks waiting in intake queues plus tasks held by forwarders that no
    /// worker has accepted yet. Running tasks are not counted.
    pub pending_tasks: usize,
    /// Intake queue length per lane.
    pub lane_depths: Vec<usize>,
    /// Most recent task panic from any worker, if any.
    pub last_failure: Option<TaskFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let static_str: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(42_u32);

        assert_eq!(panic_message(static_str.as_ref()), "static");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = StatusSnapshot {
            lane_count: 2,
            queue_size: 3,
            pending_tasks: 1,
            lane_depths: vec![1, 0],
            last_failure: None,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["pending_tasks"], 1);
        assert!(json["last_failure"].is_null());
    }
}
