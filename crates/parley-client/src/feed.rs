//! Real-time message feed for one conversation

use std::sync::Arc;

use futures::StreamExt;
use parley_protocol::{ConversationId, Message};
use parley_store::{MessageStore, StoreResult};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info};

use crate::subscription::Subscription;
use crate::view::SharedView;

/// Applies store snapshots to a shared view and fans the visible list out
/// to listeners.
pub struct MessageFeed {
    conversation_id: ConversationId,
    view: Arc<SharedView>,
    listener: Subscription,
}

impl MessageFeed {
    /// Start listening to the newest `window` messages of `conversation_id`.
    pub async fn open(
        store: &dyn MessageStore,
        view: Arc<SharedView>,
        conversation_id: ConversationId,
        window: usize,
    ) -> StoreResult<Self> {
        let snapshots = store.subscribe(&conversation_id, window).await?;
        let target = Arc::clone(&view);
        let listener = Subscription::spawn(snapshots, move |snapshot: Vec<Message>| {
            debug!(count = snapshot.len(), "Applying message snapshot");
            target.update(|state| state.apply_snapshot(snapshot));
        });
        info!(conversation_id = %conversation_id, window, "Message feed opened");

        Ok(Self {
            conversation_id,
            view,
            listener,
        })
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Call `on_change` with the visible list now and after every change.
    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: FnMut(Vec<Message>) + Send + 'static,
    {
        Subscription::spawn(WatchStream::new(self.view.watch()), on_change)
    }

    /// Stream of visible lists, starting with the current one.
    pub fn changes(&self) -> impl futures::Stream<Item = Vec<Message>> + Send + 'static {
        WatchStream::new(self.view.watch()).boxed()
    }

    pub fn visible(&self) -> Vec<Message> {
        self.view.visible()
    }

    pub(crate) fn shared_view(&self) -> Arc<SharedView> {
        Arc::clone(&self.view)
    }

    /// Stop applying snapshots.
    pub fn close(&self) {
        if self.listener.is_active() {
            info!(conversation_id = %self.conversation_id, "Message feed closed");
        }
        self.listener.unsubscribe();
    }
}

impl Drop for MessageFeed {
    fn drop(&mut self) {
        self.listener.unsubscribe();
    }
}
