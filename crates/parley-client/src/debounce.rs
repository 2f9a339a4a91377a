//! Single-slot timers, debouncing and throttling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parley_store::SnapshotStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

/// At most one pending timer. Arming cancels whatever was pending.
#[derive(Debug, Default)]
pub struct TimerSlot {
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fire` after `delay` unless cancelled or re-armed first.
    pub fn arm<F>(&mut self, delay: Duration, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let deadline = Instant::now() + delay;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            fire.await;
        }));
    }

    /// Cancel the pending timer; returns whether one was armed.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    /// Forget the handle without aborting it. For use from inside the timer
    /// task itself, which must not abort its own remaining work.
    pub fn release(&mut self) {
        self.handle = None;
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Delivers only the last value of a burst, `delay` after the burst ends.
pub struct Debouncer<T> {
    delay: Duration,
    slot: TimerSlot,
    callback: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(delay: Duration, callback: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            delay,
            slot: TimerSlot::new(),
            callback: Arc::new(callback),
        }
    }

    pub fn push(&mut self, value: T) {
        let callback = Arc::clone(&self.callback);
        self.slot.arm(self.delay, async move { callback(value) });
    }

    /// Drop the pending value, if any.
    pub fn cancel(&mut self) -> bool {
        self.slot.cancel()
    }

    pub fn is_pending(&self) -> bool {
        self.slot.is_armed()
    }
}

/// At most one item per `period`: the first item passes immediately, later
/// ones collapse to the newest and are delivered when the window closes.
pub fn throttle<T: Send + 'static>(stream: SnapshotStream<T>, period: Duration) -> SnapshotStream<T> {
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let mut stream = stream;
        let mut pending: Option<T> = None;
        let mut last_emit: Option<Instant> = None;
        let mut upstream_done = false;

        loop {
            let deadline = match (&pending, last_emit) {
                (Some(_), Some(at)) => Some(at + period),
                (Some(_), None) => Some(Instant::now()),
                (None, _) => None,
            };
            if upstream_done && deadline.is_none() {
                break;
            }

            tokio::select! {
                item = stream.next(), if !upstream_done => match item {
                    Some(value) => pending = Some(value),
                    None => upstream_done = true,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(value) = pending.take() {
                        if tx.send(value).await.is_err() {
                            break;
                        }
                        last_emit = Some(Instant::now());
                    }
                }
                _ = tx.closed() => break,
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}
