//! Listener handles over snapshot streams

use std::sync::{Arc, Mutex, MutexGuard};

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a running listener.
///
/// `unsubscribe` is idempotent and, once it returns, no callback is running
/// and none will start. Dropping the handle unsubscribes. It must not be
/// called from inside the listener's own callback.
pub struct Subscription {
    // Held for the duration of every callback.
    gate: Arc<Mutex<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    /// Drive `stream` on a new task, handing each item to `on_change`.
    pub fn spawn<S, T, F>(stream: S, mut on_change: F) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
        T: Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let gate = Arc::new(Mutex::new(true));
        let listener_gate = Arc::clone(&gate);

        let task = tokio::spawn(async move {
            futures::pin_mut!(stream);
            while let Some(item) = stream.next().await {
                let open = lock(&listener_gate);
                if !*open {
                    return;
                }
                on_change(item);
            }
            debug!("Snapshot stream ended");
        });

        Self {
            gate,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn unsubscribe(&self) {
        *lock(&self.gate) = false;
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }

    /// Whether callbacks may still be delivered.
    pub fn is_active(&self) -> bool {
        *lock(&self.gate) && lock(&self.task).as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    use super::*;

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn delivers_until_unsubscribed() {
        let (tx, rx) = mpsc::unbounded_channel();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let subscription = Subscription::spawn(UnboundedReceiverStream::new(rx), move |n: usize| {
            counter.fetch_add(n, Ordering::SeqCst);
        });

        tx.send(1).unwrap();
        tx.send(2).unwrap();
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        subscription.unsubscribe();
        let _ = tx.send(10);
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert!(!subscription.is_active());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_after_stream_end() {
        let subscription = Subscription::spawn(futures::stream::iter(vec![1, 2]), |_: i32| {});
        settle().await;

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert!(!subscription.is_active());
    }

    #[tokio::test]
    async fn drop_stops_delivery() {
        let (tx, rx) = mpsc::unbounded_channel();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let subscription = Subscription::spawn(UnboundedReceiverStream::new(rx), move |_: ()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(subscription);

        let _ = tx.send(());
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
