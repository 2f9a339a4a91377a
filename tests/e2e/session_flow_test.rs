//! End-to-end flows across the client controllers over in-memory backends.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use parley_client::{
    ChatSession, ClientConfig, ConversationBatch, ConversationService, DashboardService,
    DashboardView, TypingHub,
};
use parley_protocol::{DashboardSummary, MessageId, MessageStatus, TypingMap, UserId};
use parley_store::{InMemoryCache, InMemoryPresenceStore, InMemoryStore, StaticSummarySource};

fn user(id: &str) -> UserId {
    id.parse().unwrap()
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn two_users_exchange_a_message() {
    let store = Arc::new(InMemoryStore::with_sequential_ids("srv"));
    let conversations = ConversationService::new(store.clone());
    let conversation = conversations
        .create_direct(&user("u1"), &user("u2"))
        .await
        .unwrap();
    assert_eq!(conversation.id.as_str(), "u1_u2");

    let config = ClientConfig::default();
    let alice = ChatSession::open(store.clone(), conversation.id.clone(), user("u1"), &config)
        .await
        .unwrap();
    let bob = ChatSession::open(store.clone(), conversation.id.clone(), user("u2"), &config)
        .await
        .unwrap();

    let token = alice.stage("hi").unwrap().unwrap();
    let pending = alice.visible();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, MessageId::Local(token));
    assert_eq!(pending[0].status, MessageStatus::Sending);

    let outcome = alice.outbox().dispatch(token).await.unwrap();
    assert_eq!(outcome.message_id(), MessageId::remote("srv-1"));
    settle().await;

    for session in [&alice, &bob] {
        let visible = session.visible();
        assert_eq!(visible.len(), 1, "{} sees duplicates", session.user_id());
        assert_eq!(visible[0].id, MessageId::remote("srv-1"));
        assert_eq!(visible[0].text, "hi");
        assert_eq!(visible[0].status, MessageStatus::Delivered);
    }

    let stored = conversations.get(&conversation.id).await.unwrap().unwrap();
    assert_eq!(stored.unread_for(&user("u2")), 1);
    assert_eq!(stored.unread_for(&user("u1")), 0);
    assert_eq!(stored.last_message.unwrap().text, "hi");

    conversations
        .mark_as_read(&conversation.id, &user("u2"))
        .await
        .unwrap();
    settle().await;
    assert!(alice.visible()[0].is_read_by(&user("u2")));
}

#[tokio::test]
async fn failed_send_survives_snapshots_and_retries() {
    let store = Arc::new(InMemoryStore::with_sequential_ids("srv"));
    let conversations = ConversationService::new(store.clone());
    let conversation = conversations
        .create_direct(&user("u1"), &user("u2"))
        .await
        .unwrap();
    let session = ChatSession::open(
        store.clone(),
        conversation.id.clone(),
        user("u1"),
        &ClientConfig::default(),
    )
    .await
    .unwrap();

    store.set_offline(true).await;
    let failed = session.send("are you there?").await.unwrap().unwrap();
    assert!(!failed.is_delivered());

    store.set_offline(false).await;
    session.send("hello").await.unwrap().unwrap();
    settle().await;

    let visible = session.visible();
    assert_eq!(visible.len(), 2);
    assert!(visible
        .iter()
        .any(|m| m.status == MessageStatus::Failed && m.text == "are you there?"));

    session.retry_message(&failed.message_id()).await.unwrap();
    settle().await;
    let visible = session.visible();
    assert_eq!(visible.len(), 2);
    assert!(visible.iter().all(|m| m.status == MessageStatus::Delivered));
}

#[tokio::test(start_paused = true)]
async fn typing_is_visible_to_others_and_expires() {
    let presence = Arc::new(InMemoryPresenceStore::new());
    let hub = TypingHub::new(presence.clone(), Duration::from_secs(3));
    let conversation = "u1_u2".parse().unwrap();

    let seen: Arc<Mutex<Vec<TypingMap>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = hub
        .subscribe_to_typing(&conversation, user("u2"), move |map| {
            sink.lock().unwrap().push(map)
        })
        .await
        .unwrap();

    hub.set_typing(&conversation, &user("u1"), true).await.unwrap();
    settle().await;
    assert!(seen.lock().unwrap().last().unwrap().contains_key(&user("u1")));

    tokio::time::sleep(Duration::from_millis(3100)).await;
    settle().await;
    assert!(seen.lock().unwrap().last().unwrap().is_empty());

    subscription.unsubscribe();
    subscription.unsubscribe();
    settle().await;
    assert_eq!(presence.live_channels(), 0);
}

#[tokio::test]
async fn archive_then_delete_in_bulk() {
    let store = Arc::new(InMemoryStore::new());
    let conversations = ConversationService::new(store.clone());
    let mut ids = Vec::new();
    for i in 0..5 {
        let c = conversations
            .create_direct(&user("me"), &user(&format!("fan{i}")))
            .await
            .unwrap();
        ids.push(c.id);
    }

    let batch = ConversationBatch::new(store.clone());
    assert_eq!(
        batch
            .batch_archive_conversations(&ids[..3], &user("me"), true)
            .await
            .unwrap(),
        3
    );
    assert_eq!(conversations.list_for_user(&user("me"), false).await.unwrap().len(), 2);
    assert_eq!(conversations.list_for_user(&user("me"), true).await.unwrap().len(), 5);

    batch
        .batch_delete_conversations(&ids, &user("me"))
        .await
        .unwrap();
    assert!(conversations.list_for_user(&user("me"), true).await.unwrap().is_empty());
    assert_eq!(conversations.list_for_user(&user("fan0"), false).await.unwrap().len(), 1);
}

#[tokio::test]
async fn dashboard_survives_an_outage() {
    let source = Arc::new(StaticSummarySource::new());
    let service = DashboardService::new(source.clone(), Arc::new(InMemoryCache::new()));

    assert_eq!(service.load(&user("creator")).await, DashboardView::Empty);

    let mut summary = DashboardSummary::empty(user("creator"), chrono::Utc::now());
    summary.total_messages = 42;
    source.set_summary(summary).await;
    assert!(matches!(service.load(&user("creator")).await, DashboardView::Fresh(_)));

    source.set_available(false);
    let view = service.load(&user("creator")).await;
    assert!(!view.is_stale());
    assert_eq!(view.summary().unwrap().total_messages, 42);
}
