// Task contract consumed by the scheduler

use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// A unit of work the scheduler moves through its lanes.
///
/// The scheduler never inspects a task; it only moves it between queues and
/// finally calls [`Task::run`] exactly once. There is no return value and no
/// error channel: a task that fails does so by panicking, and the worker that
/// runs it records the panic as the scheduler's last observed failure.
///
/// Closures of the form `|cancel| async move { ... }` implement `Task`
/// directly.
#[async_trait]
pub trait Task: Send + 'static {
    /// Run to completion. `cancel` fires when the scheduler is shutting down;
    /// long-running tasks should watch it and return early.
    async fn run(self: Box<Self>, cancel: CancellationToken);
}

#[async_trait]
impl<F, Fut> Task for F
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn run(self: Box<Self>, cancel: CancellationToken) {
        (*self)(cancel).await
    }
}

/// Owned, type-erased task as it travels through the queues.
pub type BoxTask = Box<dyn Task>;
