//! Typing-presence publishing and observation
//!
//! A publisher writes "typing" once per burst of keystrokes and arms a
//! single inactivity timer; every further keystroke re-arms it. Expiry,
//! an explicit `false`, or `cleanup` write "not typing". Publishers owned by
//! a `TypingHub` drop out of it once they expire.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use parley_protocol::{others_typing, ConversationId, TypingMap, UserId};
use parley_store::{PresenceStore, StoreResult};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::debounce::TimerSlot;
use crate::metrics::TYPING_PUBLISHES;
use crate::subscription::Subscription;

#[derive(Debug, Default)]
struct Slot {
    active: bool,
    // Bumped on every call so a timer armed earlier can tell it was superseded.
    generation: u64,
    timer: TimerSlot,
}

type PublisherKey = (ConversationId, UserId);
type Publishers = Mutex<HashMap<PublisherKey, Arc<TypingPublisher>>>;

/// Typing state of one user in one conversation.
pub struct TypingPublisher {
    presence: Arc<dyn PresenceStore>,
    conversation_id: ConversationId,
    user_id: UserId,
    timeout: Duration,
    slot: Arc<Mutex<Slot>>,
    hub: Option<Weak<Publishers>>,
}

impl TypingPublisher {
    pub fn new(
        presence: Arc<dyn PresenceStore>,
        conversation_id: ConversationId,
        user_id: UserId,
        timeout: Duration,
    ) -> Self {
        Self {
            presence,
            conversation_id,
            user_id,
            timeout,
            slot: Arc::new(Mutex::new(Slot::default())),
            hub: None,
        }
    }

    fn owned_by(mut self, hub: &Arc<Publishers>) -> Self {
        self.hub = Some(Arc::downgrade(hub));
        self
    }

    pub async fn set_typing(&self, is_typing: bool) -> StoreResult<()> {
        let mut slot = self.slot.lock().await;
        slot.generation += 1;

        if !is_typing {
            slot.timer.cancel();
            slot.active = false;
            return set_typing(
                self.presence.as_ref(),
                &self.conversation_id,
                &self.user_id,
                false,
            )
            .await;
        }

        if !slot.active {
            set_typing(
                self.presence.as_ref(),
                &self.conversation_id,
                &self.user_id,
                true,
            )
            .await?;
            slot.active = true;
        }

        let generation = slot.generation;
        let expiry = Expiry {
            presence: Arc::clone(&self.presence),
            conversation_id: self.conversation_id.clone(),
            user_id: self.user_id.clone(),
            slot: Arc::clone(&self.slot),
            hub: self.hub.clone(),
        };
        slot.timer.arm(self.timeout, expiry.run(generation));
        Ok(())
    }

    /// Clear the flag when leaving the conversation.
    pub async fn cleanup(&self) -> StoreResult<()> {
        self.set_typing(false).await
    }

    pub async fn is_active(&self) -> bool {
        self.slot.lock().await.active
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }
}

impl Drop for TypingPublisher {
    fn drop(&mut self) {
        // Best effort: a pending timer is cancelled, an active flag is cleared.
        let Ok(mut slot) = self.slot.try_lock() else {
            return;
        };
        slot.timer.cancel();
        if !std::mem::take(&mut slot.active) {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let presence = Arc::clone(&self.presence);
            let conversation_id = self.conversation_id.clone();
            let user_id = self.user_id.clone();
            handle.spawn(async move {
                if let Err(err) = set_typing(presence.as_ref(), &conversation_id, &user_id, false).await {
                    warn!(conversation_id = %conversation_id, error = %err, "Failed to clear typing on drop");
                }
            });
        }
    }
}

struct Expiry {
    presence: Arc<dyn PresenceStore>,
    conversation_id: ConversationId,
    user_id: UserId,
    slot: Arc<Mutex<Slot>>,
    hub: Option<Weak<Publishers>>,
}

impl Expiry {
    async fn run(self, generation: u64) {
        {
            let mut slot = self.slot.lock().await;
            if slot.generation != generation || !slot.active {
                return;
            }
            // This task is the timer; aborting it would cut the write below short.
            slot.timer.release();
            slot.active = false;
            debug!(conversation_id = %self.conversation_id, user_id = %self.user_id, "Typing timed out");
            if let Err(err) =
                set_typing(self.presence.as_ref(), &self.conversation_id, &self.user_id, false).await
            {
                warn!(conversation_id = %self.conversation_id, error = %err, "Failed to clear typing after timeout");
            }
        }

        if let Some(publishers) = self.hub.as_ref().and_then(Weak::upgrade) {
            let key = (self.conversation_id, self.user_id);
            release_idle(&publishers, &key, &self.slot).await;
        }
    }
}

// Drop the hub's entry for `key` if it is still the expired publisher and
// nothing re-activated it meanwhile.
async fn release_idle(publishers: &Publishers, key: &PublisherKey, slot: &Arc<Mutex<Slot>>) {
    let mut publishers = publishers.lock().await;
    let Some(publisher) = publishers.get(key) else {
        return;
    };
    if !Arc::ptr_eq(&publisher.slot, slot) || slot.lock().await.active {
        return;
    }
    publishers.remove(key);
    debug!(conversation_id = %key.0, user_id = %key.1, "Released idle typing publisher");
}

/// One-shot typing flag write.
pub async fn set_typing(
    presence: &dyn PresenceStore,
    conversation_id: &ConversationId,
    user_id: &UserId,
    is_typing: bool,
) -> StoreResult<()> {
    let state = if is_typing { "typing" } else { "idle" };
    match presence.set_typing(conversation_id, user_id, is_typing).await {
        Ok(()) => {
            TYPING_PUBLISHES.with_label_values(&[state]).inc();
            debug!(conversation_id = %conversation_id, user_id = %user_id, is_typing, "Typing flag published");
            Ok(())
        }
        Err(err) => {
            warn!(conversation_id = %conversation_id, user_id = %user_id, error = %err, "Typing flag write failed");
            Err(err)
        }
    }
}

/// Call `on_change` with everyone typing in the conversation except `viewer`.
pub async fn subscribe_to_typing<F>(
    presence: &dyn PresenceStore,
    conversation_id: &ConversationId,
    viewer: UserId,
    on_change: F,
) -> StoreResult<Subscription>
where
    F: FnMut(TypingMap) + Send + 'static,
{
    let stream = presence.subscribe(conversation_id).await?;
    let others = stream.map(move |map| others_typing(&map, &viewer));
    Ok(Subscription::spawn(others, on_change))
}

/// Process-wide typing publishers keyed by conversation and user.
pub struct TypingHub {
    presence: Arc<dyn PresenceStore>,
    timeout: Duration,
    publishers: Arc<Publishers>,
}

impl TypingHub {
    pub fn new(presence: Arc<dyn PresenceStore>, timeout: Duration) -> Self {
        Self {
            presence,
            timeout,
            publishers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn set_typing(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        is_typing: bool,
    ) -> StoreResult<()> {
        let key = (conversation_id.clone(), user_id.clone());
        if !is_typing {
            let publisher = self.publishers.lock().await.remove(&key);
            return match publisher {
                Some(publisher) => publisher.set_typing(false).await,
                None => {
                    set_typing(self.presence.as_ref(), conversation_id, user_id, false).await
                }
            };
        }

        let publisher = {
            let mut publishers = self.publishers.lock().await;
            Arc::clone(publishers.entry(key).or_insert_with(|| {
                Arc::new(
                    TypingPublisher::new(
                        Arc::clone(&self.presence),
                        conversation_id.clone(),
                        user_id.clone(),
                        self.timeout,
                    )
                    .owned_by(&self.publishers),
                )
            }))
        };
        publisher.set_typing(true).await
    }

    pub async fn cleanup(&self, conversation_id: &ConversationId, user_id: &UserId) -> StoreResult<()> {
        self.set_typing(conversation_id, user_id, false).await
    }

    pub async fn subscribe_to_typing<F>(
        &self,
        conversation_id: &ConversationId,
        viewer: UserId,
        on_change: F,
    ) -> StoreResult<Subscription>
    where
        F: FnMut(TypingMap) + Send + 'static,
    {
        subscribe_to_typing(self.presence.as_ref(), conversation_id, viewer, on_change).await
    }

    /// Publishers currently registered.
    pub async fn len(&self) -> usize {
        self.publishers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use parley_store::InMemoryPresenceStore;
    use tokio::time::advance;

    use super::*;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn ids() -> (ConversationId, UserId, UserId) {
        ("u1_u2".parse().unwrap(), "u1".parse().unwrap(), "u2".parse().unwrap())
    }

    fn publisher(presence: &Arc<InMemoryPresenceStore>) -> TypingPublisher {
        let (conversation, u1, _) = ids();
        TypingPublisher::new(presence.clone(), conversation, u1, Duration::from_secs(3))
    }

    #[tokio::test(start_paused = true)]
    async fn keystrokes_publish_once_then_expire() {
        let presence = Arc::new(InMemoryPresenceStore::new());
        let (conversation, u1, _) = ids();
        let typing = publisher(&presence);

        typing.set_typing(true).await.unwrap();
        advance(Duration::from_secs(1)).await;
        typing.set_typing(true).await.unwrap();
        advance(Duration::from_secs(1)).await;
        typing.set_typing(true).await.unwrap();
        assert_eq!(presence.write_count(), 1);
        assert!(presence.snapshot(&conversation).await.contains_key(&u1));

        // The last keystroke re-armed the timer, so 2.5 s later it is still live.
        advance(Duration::from_millis(2500)).await;
        settle().await;
        assert!(typing.is_active().await);

        advance(Duration::from_millis(600)).await;
        settle().await;
        assert!(!typing.is_active().await);
        assert!(presence.snapshot(&conversation).await.is_empty());
        assert_eq!(presence.write_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_false_clears_immediately_and_disarms() {
        let presence = Arc::new(InMemoryPresenceStore::new());
        let (conversation, _, _) = ids();
        let typing = publisher(&presence);

        typing.set_typing(true).await.unwrap();
        typing.set_typing(false).await.unwrap();
        assert!(presence.snapshot(&conversation).await.is_empty());

        advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(presence.write_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_publish_leaves_publisher_inactive() {
        let presence = Arc::new(InMemoryPresenceStore::new());
        presence.set_offline(true);
        let typing = publisher(&presence);

        assert!(typing.set_typing(true).await.unwrap_err().is_transient());
        assert!(!typing.is_active().await);

        presence.set_offline(false);
        typing.set_typing(true).await.unwrap();
        assert!(typing.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn viewer_never_sees_self() {
        let presence = Arc::new(InMemoryPresenceStore::new());
        let (conversation, u1, u2) = ids();
        let hub = TypingHub::new(presence.clone(), Duration::from_secs(3));

        let seen_by_u2: Arc<StdMutex<Vec<TypingMap>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen_by_u2);
        let _sub2 = hub
            .subscribe_to_typing(&conversation, u2.clone(), move |map| sink.lock().unwrap().push(map))
            .await
            .unwrap();
        let seen_by_u1: Arc<StdMutex<Vec<TypingMap>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen_by_u1);
        let _sub1 = hub
            .subscribe_to_typing(&conversation, u1.clone(), move |map| sink.lock().unwrap().push(map))
            .await
            .unwrap();

        hub.set_typing(&conversation, &u1, true).await.unwrap();
        settle().await;
        assert!(seen_by_u2.lock().unwrap().last().unwrap().contains_key(&u1));
        assert!(seen_by_u1.lock().unwrap().iter().all(|m| m.is_empty()));

        advance(Duration::from_secs(3)).await;
        settle().await;
        assert!(seen_by_u2.lock().unwrap().last().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hub_releases_publisher_on_cleanup() {
        let presence = Arc::new(InMemoryPresenceStore::new());
        let (conversation, u1, _) = ids();
        let hub = TypingHub::new(presence.clone(), Duration::from_secs(3));

        hub.set_typing(&conversation, &u1, true).await.unwrap();
        assert_eq!(hub.len().await, 1);
        hub.cleanup(&conversation, &u1).await.unwrap();
        assert!(hub.is_empty().await);
        assert!(presence.snapshot(&conversation).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hub_drops_publishers_once_they_expire() {
        let presence = Arc::new(InMemoryPresenceStore::new());
        let u1: UserId = "u1".parse().unwrap();
        let hub = TypingHub::new(presence.clone(), Duration::from_secs(3));

        let conversations: Vec<ConversationId> = (0..100)
            .map(|i| ConversationId::direct(&u1, &format!("peer{i}").parse().unwrap()).unwrap())
            .collect();
        for conversation in &conversations {
            hub.set_typing(conversation, &u1, true).await.unwrap();
        }
        assert_eq!(hub.len().await, 100);

        // Auto-advance only moves past the deadline once every expiry has run.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(hub.is_empty().await);
        for conversation in &conversations {
            assert!(presence.snapshot(conversation).await.is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn keystroke_after_expiry_registers_a_fresh_publisher() {
        let presence = Arc::new(InMemoryPresenceStore::new());
        let (conversation, u1, _) = ids();
        let hub = TypingHub::new(presence.clone(), Duration::from_secs(3));

        hub.set_typing(&conversation, &u1, true).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(hub.is_empty().await);

        hub.set_typing(&conversation, &u1, true).await.unwrap();
        assert_eq!(hub.len().await, 1);
        assert!(presence.snapshot(&conversation).await.contains_key(&u1));
        assert_eq!(presence.write_count(), 3);
    }
}
