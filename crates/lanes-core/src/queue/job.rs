//! Type erasure between a caller's typed operation and the lane's homogeneous `pending` list.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::domain::{LaneKey, TaskId};
use crate::error::{QueueError, Rejection};

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobOutcome {
    Succeeded,
    Failed,
}

/// Settles exactly once: either `run` (the operation executes and its result is sent) or
/// `reject` (it never runs). Both consume the job.
pub(crate) trait Job: Send {
    fn run(self: Box<Self>) -> BoxFuture<JobOutcome>;

    fn reject(self: Box<Self>, rejection: Rejection);
}

struct OneShotJob<F, T, E> {
    operation: F,
    settle: oneshot::Sender<Result<T, QueueError<E>>>,
}

impl<F, Fut, T, E> Job for OneShotJob<F, T, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    fn run(self: Box<Self>) -> BoxFuture<JobOutcome> {
        let Self { operation, settle } = *self;
        Box::pin(async move {
            let result = operation().await;
            let outcome = if result.is_ok() {
                JobOutcome::Succeeded
            } else {
                JobOutcome::Failed
            };
            // receiver may be gone; the operation still counts as run
            let _ = settle.send(result.map_err(QueueError::Operation));
            outcome
        })
    }

    fn reject(self: Box<Self>, rejection: Rejection) {
        let _ = self.settle.send(Err(QueueError::Rejected(rejection)));
    }
}

/// Pair a typed operation with the future its caller awaits.
pub(crate) fn prepare<F, Fut, T, E>(
    key: LaneKey,
    task_id: TaskId,
    operation: F,
) -> (Box<dyn Job>, Completion<T, E>)
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let (settle, settled) = oneshot::channel();
    let job = Box::new(OneShotJob { operation, settle });
    let completion = Completion {
        key,
        task_id,
        settled,
    };
    (job, completion)
}

/// Future returned by [`KeyedQueue::enqueue`](super::KeyedQueue::enqueue).
///
/// Resolves once the operation has run, or it was rejected without running. Dropping it
/// does not cancel the operation.
#[must_use = "a Completion does nothing unless awaited; dropping it discards the result"]
#[derive(Debug)]
pub struct Completion<T, E> {
    key: LaneKey,
    task_id: TaskId,
    settled: oneshot::Receiver<Result<T, QueueError<E>>>,
}

impl<T, E> Completion<T, E> {
    pub fn key(&self) -> &LaneKey {
        &self.key
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }
}

impl<T, E> Future for Completion<T, E> {
    type Output = Result<T, QueueError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.settled)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(QueueError::Abandoned)))
    }
}
