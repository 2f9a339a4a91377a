//! View state shared between a session's outbox and feed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use parley_protocol::{ConversationId, Message, UserId};
use tokio::sync::watch;
use tracing::debug;

use crate::reconcile::ViewState;

/// A `ViewState` behind a lock plus the channel its visible list is published on.
pub struct SharedView {
    state: Mutex<ViewState>,
    visible: watch::Sender<Vec<Message>>,
    alive: AtomicBool,
}

impl SharedView {
    /// Empty view for `user_id` in `conversation_id`, publishing an empty list.
    pub fn new(conversation_id: ConversationId, user_id: UserId) -> Arc<Self> {
        let (visible, _) = watch::channel(Vec::new());
        Arc::new(Self {
            state: Mutex::new(ViewState::new(conversation_id, user_id)),
            visible,
            alive: AtomicBool::new(true),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mutate the state and republish the visible list while the view is alive.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut ViewState) -> R) -> R {
        let mut state = self.lock();
        let result = mutate(&mut state);
        if self.is_alive() {
            self.visible.send_replace(state.visible());
        }
        result
    }

    /// Inspect the state without republishing.
    pub fn read<R>(&self, inspect: impl FnOnce(&ViewState) -> R) -> R {
        inspect(&self.lock())
    }

    /// Last published visible list.
    pub fn visible(&self) -> Vec<Message> {
        self.visible.borrow().clone()
    }

    /// Receiver of every visible list published from now on.
    pub fn watch(&self) -> watch::Receiver<Vec<Message>> {
        self.visible.subscribe()
    }

    /// Whether updates are still published.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Stop republishing. Later mutations still apply but nobody hears about them.
    pub fn close(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            debug!(conversation_id = %self.lock().conversation_id(), "View closed");
        }
    }
}

impl std::fmt::Debug for SharedView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedView")
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}
