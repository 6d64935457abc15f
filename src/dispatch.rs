//! Off-thread execution of blocking consumer operations.
//!
//! Operations run on the runtime's blocking pool, bounded by a semaphore.
//! Their callbacks are not run on the worker: each one is bound to its
//! result and queued on a [`CompletionQueue`] that the owning thread drains.

use crate::error::{ConsumerError, Result};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A callback bound to its result, waiting to run on the caller's thread
pub struct Completion {
    callback: Box<dyn FnOnce() + Send>,
}

impl Completion {
    fn new<F>(callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    pub fn run(self) {
        (self.callback)()
    }
}

/// Receiving end of a dispatcher's completions, in posting order
pub struct CompletionQueue {
    receiver: mpsc::UnboundedReceiver<Completion>,
}

impl CompletionQueue {
    /// Runs every completion that is ready without waiting.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(completion) = self.receiver.try_recv() {
            completion.run();
            ran += 1;
        }
        ran
    }

    /// Waits for the next completion and runs it. Returns false once every
    /// dispatcher handle is gone and the queue is drained.
    pub async fn run_next(&mut self) -> bool {
        match self.receiver.recv().await {
            Some(completion) => {
                completion.run();
                true
            }
            None => false,
        }
    }
}

impl Stream for CompletionQueue {
    type Item = Completion;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Cloneable handle for submitting work
#[derive(Clone)]
pub struct TaskDispatcher {
    runtime: Handle,
    permits: Arc<Semaphore>,
    workers: usize,
    completions: mpsc::UnboundedSender<Completion>,
}

impl TaskDispatcher {
    pub fn new(runtime: Handle, workers: usize) -> (Self, CompletionQueue) {
        let workers = workers.max(1);
        let (completions, receiver) = mpsc::unbounded_channel();
        let dispatcher = Self {
            runtime,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            completions,
        };
        (dispatcher, CompletionQueue { receiver })
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Operations currently holding a worker slot
    pub fn in_flight(&self) -> usize {
        self.workers - self.permits.available_permits()
    }

    /// Runs a blocking operation on a worker and awaits its result.
    pub async fn run<T, Op>(&self, op: Op) -> Result<T>
    where
        T: Send + 'static,
        Op: FnOnce() -> Result<T> + Send + 'static,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ConsumerError::Internal("worker pool is closed".to_string()))?;

        self.runtime.spawn_blocking(op).await?
    }

    /// Like [`run`](Self::run), but gives up with `None` if `token` is
    /// cancelled before a worker is free. Once `op` has started it always
    /// runs to completion.
    pub async fn run_unless_cancelled<T, Op>(
        &self,
        token: &CancellationToken,
        op: Op,
    ) -> Option<Result<T>>
    where
        T: Send + 'static,
        Op: FnOnce() -> Result<T> + Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            permit = self.permits.clone().acquire_owned() => permit,
        };
        let _permit = match permit {
            Ok(permit) => permit,
            Err(_) => {
                return Some(Err(ConsumerError::Internal(
                    "worker pool is closed".to_string(),
                )))
            }
        };

        Some(match self.runtime.spawn_blocking(op).await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        })
    }

    /// Runs `op` off-thread and queues `callback` with its result.
    pub fn submit<T, Op, Cb>(&self, op: Op, callback: Cb)
    where
        T: Send + 'static,
        Op: FnOnce() -> Result<T> + Send + 'static,
        Cb: FnOnce(Result<T>) + Send + 'static,
    {
        let dispatcher = self.clone();
        self.submit_async(async move { dispatcher.run(op).await }, callback);
    }

    /// Drives `work` on the runtime and queues `callback` with its output.
    pub fn submit_async<T, Fut, Cb>(&self, work: Fut, callback: Cb)
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        Cb: FnOnce(Result<T>) + Send + 'static,
    {
        let dispatcher = self.clone();
        self.runtime.spawn(async move {
            let result = work.await;
            dispatcher.post(move || callback(result));
        });
    }

    /// Queues a callback for the owning thread.
    pub fn post<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.completions.send(Completion::new(callback)).is_err() {
            warn!("Completion queue dropped, discarding result");
        }
    }
}
