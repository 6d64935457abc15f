//! Background consume loop.
//!
//! At most one loop runs per consumer. The loop polls through the task
//! dispatcher, delivers each result to the caller's completion queue, and
//! checks its cancellation token between polls.

use crate::consumer::KafkaConsumer;
use crate::dispatch::TaskDispatcher;
use crate::error::{ConsumerError, ErrorKind, Result};
use crate::events::ConsumerEvent;
use crate::types::Message;
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Callback receiving every delivered loop result
pub type LoopCallback = Arc<dyn Fn(Result<Message>) + Send + Sync>;

/// Poll timeout and backoff for a consume loop
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub timeout: Duration,
    pub sleep_delay: Duration,
}

struct RunningLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
    exit: Arc<LoopExit>,
}

/// Set once the loop task is gone, whether it returned, panicked or was
/// aborted. Waitable from both blocking and async callers.
#[derive(Default)]
struct LoopExit {
    done: Mutex<bool>,
    signal: Condvar,
    notify: Notify,
}

impl LoopExit {
    fn set(&self) {
        *self.done.lock() = true;
        self.signal.notify_all();
        self.notify.notify_waiters();
    }

    fn is_set(&self) -> bool {
        *self.done.lock()
    }

    fn wait_blocking(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.signal.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        *done
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

struct ExitOnDrop(Arc<LoopExit>);

impl Drop for ExitOnDrop {
    fn drop(&mut self) {
        self.0.set();
    }
}

/// Holds the token and task handle of the consumer's loop.
///
/// A loop stays in the slot until its task has exited, so a cancelled loop
/// that is still finishing a poll keeps blocking new starts.
#[derive(Default)]
pub(crate) struct LoopSlot {
    current: Mutex<Option<RunningLoop>>,
}

impl LoopSlot {
    pub fn is_running(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .map(|running| !running.exit.is_set())
            .unwrap_or(false)
    }

    /// Spawns a loop unless an unfinished one already occupies the slot.
    pub fn start<F, Fut>(&self, runtime: &Handle, body: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut current = self.current.lock();
        if let Some(running) = current.as_ref() {
            if !running.exit.is_set() {
                return Err(ConsumerError::State("Consume was already called".to_string()));
            }
        }

        let token = CancellationToken::new();
        let exit = Arc::new(LoopExit::default());
        let guard = ExitOnDrop(exit.clone());
        let task = body(token.clone());
        let handle = runtime.spawn(async move {
            let _exit = guard;
            task.await
        });
        *current = Some(RunningLoop {
            token,
            handle,
            exit,
        });
        Ok(())
    }

    /// Cancels the current loop and returns its exit signal.
    fn cancel(&self) -> Option<Arc<LoopExit>> {
        self.current.lock().as_ref().map(|running| {
            running.token.cancel();
            running.exit.clone()
        })
    }

    /// Clears the slot if it still holds the loop behind `exit`.
    fn take_exited(&self, exit: &Arc<LoopExit>) -> Option<RunningLoop> {
        let mut current = self.current.lock();
        match current.as_ref() {
            Some(running) if Arc::ptr_eq(&running.exit, exit) => current.take(),
            _ => None,
        }
    }

    /// Cancels the loop and waits up to `wait` for its last iteration.
    ///
    /// On timeout the loop stays in the slot and a state error is returned.
    pub async fn stop(&self, wait: Duration) -> Result<()> {
        let Some(exit) = self.cancel() else {
            return Ok(());
        };

        if tokio::time::timeout(wait, exit.wait()).await.is_err() {
            return Err(stop_timed_out(wait));
        }

        match self.take_exited(&exit) {
            Some(running) => running.handle.await.map_err(ConsumerError::from),
            None => Ok(()),
        }
    }

    /// Blocking form of [`stop`](Self::stop) for synchronous callers.
    ///
    /// Must not run on a runtime thread the loop itself needs to make
    /// progress, or it can only end by timing out.
    pub fn stop_blocking(&self, wait: Duration) -> Result<()> {
        let Some(exit) = self.cancel() else {
            return Ok(());
        };

        if !exit.wait_blocking(wait) {
            return Err(stop_timed_out(wait));
        }

        self.take_exited(&exit);
        Ok(())
    }
}

fn stop_timed_out(wait: Duration) -> ConsumerError {
    warn!("Consume loop did not stop within {:?}", wait);
    ConsumerError::State(format!("consume loop did not stop within {:?}", wait))
}

/// Body of the consume loop task.
pub(crate) async fn run(
    consumer: KafkaConsumer,
    dispatcher: TaskDispatcher,
    token: CancellationToken,
    settings: LoopSettings,
    callback: LoopCallback,
) {
    info!(
        "Consume loop started (timeout {:?}, sleep delay {:?})",
        settings.timeout, settings.sleep_delay
    );

    while !token.is_cancelled() {
        let polling = consumer.clone();
        let timeout = settings.timeout;
        let Some(result) = dispatcher
            .run_unless_cancelled(&token, move || polling.consume(timeout))
            .await
        else {
            debug!("Consume loop cancelled while waiting for a worker");
            break;
        };

        let (deliver, back_off) = match &result {
            Ok(message) if message.is_timeout() => (false, true),
            Ok(_) => (true, false),
            Err(err) if err.kind() == ErrorKind::State => {
                debug!("Consume loop exiting: {}", err);
                break;
            }
            Err(err) => {
                debug!("Consume loop delivering error: {}", err);
                (true, true)
            }
        };

        if deliver {
            let cb = callback.clone();
            dispatcher.post(move || cb(result));
        }

        if back_off {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(settings.sleep_delay) => {}
            }
        }
    }

    info!("Consume loop stopped");
    consumer.publish_event(ConsumerEvent::ConsumeLoopStopped);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slot_rejects_second_loop_until_finished() {
        let slot = LoopSlot::default();
        let runtime = Handle::current();

        slot.start(&runtime, |token| async move { token.cancelled().await })
            .unwrap();
        assert!(slot.is_running());

        let err = slot
            .start(&runtime, |_| async {})
            .unwrap_err();
        assert!(matches!(err, ConsumerError::State(_)));

        slot.stop(Duration::from_secs(1)).await.unwrap();
        assert!(!slot.is_running());

        slot.start(&runtime, |_| async {}).unwrap();
    }

    #[tokio::test]
    async fn test_finished_loop_can_be_replaced() {
        let slot = LoopSlot::default();
        let runtime = Handle::current();

        slot.start(&runtime, |_| async {}).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!slot.is_running());
        assert!(slot.start(&runtime, |_| async {}).is_ok());
    }

    #[tokio::test]
    async fn test_stop_times_out_on_stuck_loop() {
        let slot = LoopSlot::default();
        slot.start(&Handle::current(), |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await
        })
        .unwrap();

        let err = slot.stop(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, ConsumerError::State(_)));

        // Cancelled but not exited: the slot stays taken
        assert!(slot.is_running());
        let err = slot.start(&Handle::current(), |_| async {}).unwrap_err();
        assert!(matches!(err, ConsumerError::State(_)));
    }

    #[tokio::test]
    async fn test_slot_frees_once_slow_loop_exits() {
        let slot = LoopSlot::default();
        slot.start(&Handle::current(), |_| async {
            tokio::time::sleep(Duration::from_millis(150)).await
        })
        .unwrap();

        assert!(slot.stop(Duration::from_millis(10)).await.is_err());
        assert!(slot.stop(Duration::from_secs(2)).await.is_ok());
        assert!(!slot.is_running());
        slot.start(&Handle::current(), |_| async {}).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_stop_waits_for_exit() {
        let slot = Arc::new(LoopSlot::default());
        let exited = Arc::new(Mutex::new(false));

        let flag = exited.clone();
        slot.start(&Handle::current(), move |token| async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(30)).await;
            *flag.lock() = true;
        })
        .unwrap();

        let stopping = slot.clone();
        tokio::task::spawn_blocking(move || stopping.stop_blocking(Duration::from_secs(2)))
            .await
            .unwrap()
            .unwrap();

        assert!(*exited.lock());
        assert!(!slot.is_running());
        assert!(slot.stop_blocking(Duration::from_millis(1)).is_ok());
    }
}
