// Submit -> poll task handle for asynchronous services
//
// The orchestrator never blocks on a service. It holds a Task and checks it
// once per frame (non-blocking, via now_or_never); the task is dropped as soon
// as it yields a result.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::ServiceError;

/// Pending result of an asynchronous service call
pub struct Task<T> {
    future: BoxFuture<'static, Result<T, ServiceError>>,
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Task<T> {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, ServiceError>> + Send + 'static,
    {
        Self { future: future.boxed() }
    }

    /// Already-completed task
    pub fn ready(result: Result<T, ServiceError>) -> Self {
        Self::new(futures::future::ready(result))
    }

    /// Non-blocking check; None while the service is still working
    ///
    /// Must not be polled again after it returned Some.
    pub fn poll(&mut self) -> Option<Result<T, ServiceError>> {
        (&mut self.future).now_or_never()
    }

    /// Block the calling thread until the result is available
    pub fn wait(self) -> Result<T, ServiceError> {
        pollster::block_on(self.future)
    }
}

/// Completion side of [`task_channel`]
#[derive(Debug)]
pub struct TaskCompleter<T> {
    sender: oneshot::Sender<Result<T, ServiceError>>,
}

impl<T> TaskCompleter<T> {
    pub fn complete(self, result: Result<T, ServiceError>) {
        // Receiver gone means the request was abandoned; nothing to report to
        let _ = self.sender.send(result);
    }

    pub fn resolve(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn reject(self, error: ServiceError) {
        self.complete(Err(error));
    }

    /// True once the Task side has been dropped
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_canceled()
    }
}

/// Task whose result is delivered from elsewhere (worker thread, test, ...)
///
/// Dropping the completer without completing rejects the task.
pub fn task_channel<T: Send + 'static>() -> (TaskCompleter<T>, Task<T>) {
    let (sender, receiver) = oneshot::channel();
    let task = Task::new(receiver.map(|result| match result {
        Ok(result) => result,
        Err(oneshot::Canceled) => Err(ServiceError::new("service dropped the request")),
    }));
    (TaskCompleter { sender }, task)
}

/// Bounded number of concurrently running service jobs
#[derive(Debug, Clone)]
pub(crate) struct JobSlots {
    max: usize,
    used: Arc<AtomicUsize>,
}

impl JobSlots {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            used: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn in_use(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub(crate) fn try_acquire(&self) -> Option<JobSlot> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.max).then_some(n + 1))
            .ok()
            .map(|_| JobSlot(Arc::clone(&self.used)))
    }
}

/// Releases its slot when dropped, even by unwinding
pub(crate) struct JobSlot(Arc<AtomicUsize>);

impl Drop for JobSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Run a service job on the worker pool (inline without `rayon`)
pub(crate) fn spawn_job<F: FnOnce() + Send + 'static>(job: F) {
    #[cfg(feature = "rayon")]
    rayon::spawn(job);
    #[cfg(not(feature = "rayon"))]
    job();
}
