//! Keyed snapshot channels with explicit lifecycle.
//!
//! A channel for a key is created by the first subscriber and torn down when
//! the last subscriber's stream is dropped. Publishing to a key nobody watches
//! is a no-op; the owning store keeps the durable state and seeds new channels
//! from it.

use std::collections::HashMap;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

/// Stream of full snapshots: the current value on subscribe, then one per change.
pub type SnapshotStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

struct Channel<T> {
    tx: watch::Sender<T>,
    leases: usize,
}

type Channels<K, T> = Mutex<HashMap<K, Channel<T>>>;

fn lock<K, T>(channels: &Channels<K, T>) -> MutexGuard<'_, HashMap<K, Channel<T>>> {
    channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ChannelRegistry<K, T> {
    channels: Arc<Channels<K, T>>,
}

impl<K, T> ChannelRegistry<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to `key`, creating its channel from `seed` if none is live.
    pub fn subscribe(&self, key: K, seed: impl FnOnce() -> T) -> SnapshotStream<T> {
        let rx = {
            let mut channels = lock(&self.channels);
            let channel = channels.entry(key.clone()).or_insert_with(|| {
                debug!(key = ?key, "Creating snapshot channel");
                let (tx, _) = watch::channel(seed());
                Channel { tx, leases: 0 }
            });
            channel.leases += 1;
            channel.tx.subscribe()
        };

        Box::pin(Leased {
            inner: Box::pin(WatchStream::new(rx)),
            _lease: Lease {
                channels: Arc::downgrade(&self.channels),
                key,
            },
        })
    }

    /// Push a new snapshot to live subscribers of `key`.
    ///
    /// Returns `false` when no channel exists for the key.
    pub fn publish(&self, key: &K, value: T) -> bool {
        let channels = lock(&self.channels);
        match channels.get(key) {
            Some(channel) => {
                channel.tx.send_replace(value);
                true
            }
            None => false,
        }
    }

    /// Number of live channels.
    pub fn len(&self) -> usize {
        lock(&self.channels).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscriber_count(&self, key: &K) -> usize {
        lock(&self.channels).get(key).map_or(0, |c| c.leases)
    }
}

impl<K, T> Default for ChannelRegistry<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

struct Lease<K: Eq + Hash + std::fmt::Debug, T> {
    channels: Weak<Channels<K, T>>,
    key: K,
}

impl<K: Eq + Hash + std::fmt::Debug, T> Drop for Lease<K, T> {
    fn drop(&mut self) {
        let Some(channels) = self.channels.upgrade() else {
            return;
        };
        let mut channels = lock(&channels);
        if let Some(channel) = channels.get_mut(&self.key) {
            channel.leases = channel.leases.saturating_sub(1);
            if channel.leases == 0 {
                channels.remove(&self.key);
                debug!(key = ?self.key, "Tore down snapshot channel");
            }
        }
    }
}

struct Leased<K: Eq + Hash + std::fmt::Debug, T> {
    inner: SnapshotStream<T>,
    _lease: Lease<K, T>,
}

// `inner` is already boxed and pinned; nothing is structurally pinned here.
impl<K: Eq + Hash + std::fmt::Debug, T> Unpin for Leased<K, T> {}

impl<K: Eq + Hash + std::fmt::Debug, T> Stream for Leased<K, T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.inner.as_mut().poll_next(cx)
    }
}
