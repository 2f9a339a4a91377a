//! Merge of server snapshots with locally pending messages.
//!
//! The visible list is always a pure function of three sets:
//! - the latest confirmed snapshot from the store
//! - local entries, in submission order
//! - the correlation map from client token to the store's receipt
//!
//! Remote ids handed back in a receipt are remembered as consumed, so a
//! message the store already attributed to one local entry can never stand
//! in for another one by matching text. Entries hidden that way are only
//! dropped once their own write settles.
//!
//! Nothing here performs I/O; the controllers mutate a `ViewState` and
//! republish `visible()`.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use parley_protocol::{
    ClientToken, ConversationId, DeliveryFailure, Message, MessageId, MessageMetadata,
    MessageReceipt, MessageStatus, UserId,
};

/// Delivery state of a message that only exists on this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    /// A write is in flight or queued.
    Sending,
    /// The last write attempt failed; the entry waits for a retry.
    Failed(DeliveryFailure),
}

/// A message staged on this device that the store has not confirmed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEntry {
    /// Correlates the entry with its write and its receipt.
    pub token: ClientToken,
    /// Validated text exactly as it will be written.
    pub text: String,
    /// Provisional timestamp, strictly increasing across entries.
    pub created_at: DateTime<Utc>,
    /// When the current write attempt started. Reset by every retry, so only
    /// server messages at or after it can stand in for the entry.
    pub attempt_started_at: DateTime<Utc>,
    pub state: LocalState,
}

impl LocalEntry {
    /// Whether the entry is waiting for a retry.
    pub fn is_failed(&self) -> bool {
        matches!(self.state, LocalState::Failed(_))
    }
}

/// Per-conversation view state shared by the outbox and the feed.
#[derive(Debug, Clone)]
pub struct ViewState {
    conversation_id: ConversationId,
    user_id: UserId,
    confirmed: Vec<Message>,
    local: Vec<LocalEntry>,
    correlations: HashMap<ClientToken, MessageReceipt>,
    consumed: HashSet<String>,
}

impl ViewState {
    /// Empty state for `user_id` viewing `conversation_id`.
    pub fn new(conversation_id: ConversationId, user_id: UserId) -> Self {
        Self {
            conversation_id,
            user_id,
            confirmed: Vec::new(),
            local: Vec::new(),
            correlations: HashMap::new(),
            consumed: HashSet::new(),
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn confirmed(&self) -> &[Message] {
        &self.confirmed
    }

    /// Unconfirmed entries in submission order, including hidden ones.
    pub fn local_entries(&self) -> &[LocalEntry] {
        &self.local
    }

    pub fn correlation(&self, token: &ClientToken) -> Option<&MessageReceipt> {
        self.correlations.get(token)
    }

    /// Add a `sending` placeholder for already-validated text.
    pub fn stage(&mut self, text: impl Into<String>, now: DateTime<Utc>) -> ClientToken {
        let created_at = match self.local.last() {
            Some(last) if now <= last.created_at => last.created_at + Duration::microseconds(1),
            _ => now,
        };
        let token = ClientToken::new();
        self.local.push(LocalEntry {
            token,
            text: text.into(),
            created_at,
            attempt_started_at: created_at,
            state: LocalState::Sending,
        });
        token
    }

    /// Text of a local entry still awaiting its first write.
    pub fn pending_text(&self, token: &ClientToken) -> Option<String> {
        if self.correlations.contains_key(token) {
            return None;
        }
        self.entry(token)
            .filter(|entry| entry.state == LocalState::Sending)
            .map(|entry| entry.text.clone())
    }

    /// Move a failed entry back to `sending`, returning its text.
    pub fn begin_retry(&mut self, token: &ClientToken, now: DateTime<Utc>) -> Option<String> {
        let entry = self.local.iter_mut().find(|e| e.token == *token)?;
        if !entry.is_failed() {
            return None;
        }
        entry.state = LocalState::Sending;
        entry.attempt_started_at = now.max(entry.created_at);
        Some(entry.text.clone())
    }

    /// Record a successful write.
    pub fn acknowledge(&mut self, token: ClientToken, receipt: MessageReceipt) {
        if self.entry(&token).is_none() {
            return;
        }
        let already_confirmed = self
            .confirmed
            .iter()
            .any(|m| m.id.remote_id() == Some(receipt.id.as_str()));
        self.consumed.insert(receipt.id.clone());
        if already_confirmed {
            self.local.retain(|e| e.token != token);
        } else {
            self.correlations.insert(token, receipt);
        }
    }

    /// Record a failed write. Entries already acknowledged stay delivered.
    pub fn fail(&mut self, token: &ClientToken, failure: DeliveryFailure) {
        if self.correlations.contains_key(token) {
            return;
        }
        if let Some(entry) = self.local.iter_mut().find(|e| e.token == *token) {
            entry.state = LocalState::Failed(failure);
        }
    }

    /// Replace the confirmed set and prune acknowledged entries it now covers.
    ///
    /// Entries hidden only by a text match stay until their own ack or
    /// failure arrives.
    pub fn apply_snapshot(&mut self, snapshot: Vec<Message>) {
        self.confirmed = dedup_confirmed(snapshot);
        let present: HashSet<&str> = self
            .confirmed
            .iter()
            .filter_map(|m| m.id.remote_id())
            .collect();

        let settled: HashSet<ClientToken> = self
            .correlations
            .iter()
            .filter(|(_, receipt)| present.contains(receipt.id.as_str()))
            .map(|(token, _)| *token)
            .collect();
        self.local.retain(|e| !settled.contains(&e.token));
        self.correlations.retain(|token, _| !settled.contains(token));

        // Ids outside the window can no longer be matched.
        let correlations = &self.correlations;
        self.consumed.retain(|id| {
            present.contains(id.as_str()) || correlations.values().any(|r| r.id == *id)
        });
    }

    /// The list a conversation screen renders.
    pub fn visible(&self) -> Vec<Message> {
        merge(
            &self.conversation_id,
            &self.user_id,
            &self.confirmed,
            &self.local,
            &self.correlations,
            &self.consumed,
        )
    }

    fn entry(&self, token: &ClientToken) -> Option<&LocalEntry> {
        self.local.iter().find(|e| e.token == *token)
    }
}

fn dedup_confirmed(snapshot: Vec<Message>) -> Vec<Message> {
    let mut seen = HashSet::new();
    let mut confirmed: Vec<Message> = snapshot
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect();
    confirmed.sort_by_key(|m| m.timestamp);
    confirmed
}

// Local entries that one of the viewer's confirmed messages now stands in for.
fn hidden_entries(
    viewer: &UserId,
    confirmed: &[Message],
    local: &[LocalEntry],
    correlations: &HashMap<ClientToken, MessageReceipt>,
    consumed: &HashSet<String>,
) -> HashSet<ClientToken> {
    let present: HashSet<&str> = confirmed.iter().filter_map(|m| m.id.remote_id()).collect();
    let mut hidden = HashSet::new();

    // Ids already returned in a receipt cannot be claimed by content.
    let mut claimed: HashSet<&str> = correlations
        .values()
        .map(|r| r.id.as_str())
        .chain(consumed.iter().map(String::as_str))
        .collect();
    for entry in local {
        if let Some(receipt) = correlations.get(&entry.token) {
            if present.contains(receipt.id.as_str()) {
                hidden.insert(entry.token);
            }
        }
    }

    for entry in local {
        if entry.state != LocalState::Sending || correlations.contains_key(&entry.token) {
            continue;
        }
        let candidate = confirmed.iter().find(|m| {
            &m.sender_id == viewer
                && m.id.remote_id().is_some_and(|id| !claimed.contains(id))
                && m.text == entry.text
                && m.timestamp >= entry.attempt_started_at
        });
        if let Some(id) = candidate.and_then(|m| m.id.remote_id()) {
            claimed.insert(id);
            hidden.insert(entry.token);
        }
    }
    hidden
}

/// Visible list for `viewer`: confirmed messages plus surviving local entries.
///
/// `consumed` holds remote ids already attributed to a local write.
pub fn merge(
    conversation_id: &ConversationId,
    viewer: &UserId,
    confirmed: &[Message],
    local: &[LocalEntry],
    correlations: &HashMap<ClientToken, MessageReceipt>,
    consumed: &HashSet<String>,
) -> Vec<Message> {
    let hidden = hidden_entries(viewer, confirmed, local, correlations, consumed);

    let mut seen = HashSet::new();
    let mut ranked: Vec<(DateTime<Utc>, usize, Message)> = confirmed
        .iter()
        .filter(|m| seen.insert(m.id.clone()))
        .map(|m| (m.timestamp, 0, m.clone()))
        .collect();

    for (index, entry) in local.iter().enumerate() {
        if hidden.contains(&entry.token) {
            continue;
        }
        let message = local_message(conversation_id, viewer, entry, correlations.get(&entry.token));
        ranked.push((message.timestamp, index + 1, message));
    }

    ranked.sort_by_key(|(timestamp, rank, _)| (*timestamp, *rank));
    ranked.into_iter().map(|(_, _, message)| message).collect()
}

fn local_message(
    conversation_id: &ConversationId,
    viewer: &UserId,
    entry: &LocalEntry,
    receipt: Option<&MessageReceipt>,
) -> Message {
    let (id, status, timestamp, failure) = match (receipt, entry.state) {
        (Some(receipt), _) => (
            MessageId::remote(receipt.id.clone()),
            MessageStatus::Delivered,
            receipt.timestamp,
            None,
        ),
        (None, LocalState::Sending) => (
            MessageId::Local(entry.token),
            MessageStatus::Sending,
            entry.created_at,
            None,
        ),
        (None, LocalState::Failed(failure)) => (
            MessageId::Local(entry.token),
            MessageStatus::Failed,
            entry.created_at,
            Some(failure),
        ),
    };
    Message {
        id,
        conversation_id: conversation_id.clone(),
        sender_id: viewer.clone(),
        text: entry.text.clone(),
        status,
        timestamp,
        read_by: Default::default(),
        metadata: MessageMetadata::default(),
        failure,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn state() -> ViewState {
        ViewState::new("u1_u2".parse().unwrap(), "u1".parse().unwrap())
    }

    fn server(id: &str, sender: &str, text: &str, secs: i64) -> Message {
        Message::confirmed(
            id.to_string(),
            "u1_u2".parse().unwrap(),
            sender.parse().unwrap(),
            text.to_string(),
            at(secs),
        )
    }

    fn receipt(id: &str, secs: i64) -> MessageReceipt {
        MessageReceipt {
            id: id.to_string(),
            timestamp: at(secs),
        }
    }

    #[test]
    fn staged_entry_is_visible_as_sending() {
        let mut view = state();
        let token = view.stage("hi", at(0));

        let visible = view.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, MessageId::Local(token));
        assert_eq!(visible[0].status, MessageStatus::Sending);
        assert_eq!(visible[0].sender_id.as_str(), "u1");
    }

    #[test]
    fn provisional_timestamps_keep_submission_order() {
        let mut view = state();
        let first = view.stage("a", at(5));
        let second = view.stage("b", at(5));
        let third = view.stage("c", at(1));

        let ids: Vec<MessageId> = view.visible().into_iter().map(|m| m.id).collect();
        assert_eq!(
            ids,
            vec![
                MessageId::Local(first),
                MessageId::Local(second),
                MessageId::Local(third)
            ]
        );
    }

    #[test]
    fn acknowledged_entry_shows_delivered_until_snapshot_arrives() {
        let mut view = state();
        let token = view.stage("hi", at(0));
        view.acknowledge(token, receipt("srv-1", 1));

        let visible = view.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, MessageId::remote("srv-1"));
        assert_eq!(visible[0].status, MessageStatus::Delivered);

        view.apply_snapshot(vec![server("srv-1", "u1", "hi", 1)]);
        let visible = view.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, MessageId::remote("srv-1"));
        assert!(view.local_entries().is_empty());
        assert!(view.correlation(&token).is_none());
    }

    #[test]
    fn snapshot_before_ack_hides_by_content() {
        let mut view = state();
        let token = view.stage("hi", at(0));
        view.apply_snapshot(vec![server("srv-1", "u1", "hi", 1)]);

        assert_eq!(view.visible().len(), 1);
        assert_eq!(view.local_entries().len(), 1);

        // The late ack settles the entry without resurrecting it.
        view.acknowledge(token, receipt("srv-1", 1));
        assert_eq!(view.visible().len(), 1);
        assert!(view.local_entries().is_empty());
    }

    #[test]
    fn ack_for_text_matched_message_releases_the_wrong_entry() {
        let mut view = state();
        let first = view.stage("ok", at(0));
        let second = view.stage("ok", at(0));

        // The second write lands and is seen before either ack.
        view.apply_snapshot(vec![server("srv-1", "u1", "ok", 1)]);
        let visible = view.visible();
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[0].id, MessageId::Local(second));

        view.acknowledge(second, receipt("srv-1", 1));
        let visible = view.visible();
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[0].id, MessageId::Local(first));
        assert_eq!(visible[0].status, MessageStatus::Sending);
        assert_eq!(visible[1].id, MessageId::remote("srv-1"));

        view.fail(&first, DeliveryFailure::Transient);
        let visible = view.visible();
        assert_eq!(visible[0].id, MessageId::Local(first));
        assert_eq!(visible[0].status, MessageStatus::Failed);
        assert_eq!(view.begin_retry(&first, at(5)), Some("ok".to_string()));
    }

    #[test]
    fn retried_entry_is_not_claimed_by_another_entrys_message() {
        let mut view = state();
        let failed = view.stage("ok", at(0));
        view.fail(&failed, DeliveryFailure::Transient);

        let delivered = view.stage("ok", at(1));
        view.acknowledge(delivered, receipt("srv-1", 2));
        view.apply_snapshot(vec![server("srv-1", "u1", "ok", 2)]);

        assert_eq!(view.begin_retry(&failed, at(3)), Some("ok".to_string()));
        view.apply_snapshot(vec![
            server("srv-1", "u1", "ok", 2),
            server("srv-2", "u2", "hey", 4),
        ]);
        assert!(view
            .visible()
            .iter()
            .any(|m| m.id == MessageId::Local(failed) && m.status == MessageStatus::Sending));

        view.fail(&failed, DeliveryFailure::Transient);
        let visible = view.visible();
        assert_eq!(visible.len(), 3);
        assert!(visible
            .iter()
            .any(|m| m.id == MessageId::Local(failed) && m.status == MessageStatus::Failed));
        assert_eq!(view.begin_retry(&failed, at(5)), Some("ok".to_string()));
    }

    #[test]
    fn retry_ignores_matching_text_older_than_the_attempt() {
        let mut view = state();
        let token = view.stage("ok", at(0));
        view.fail(&token, DeliveryFailure::Transient);
        view.apply_snapshot(vec![server("srv-1", "u1", "ok", 2)]);

        view.begin_retry(&token, at(10));
        let visible = view.visible();
        assert_eq!(visible.len(), 2);
        assert!(visible
            .iter()
            .any(|m| m.id == MessageId::Local(token) && m.status == MessageStatus::Sending));
    }

    #[test]
    fn older_identical_text_does_not_hide_new_entry() {
        let mut view = state();
        view.apply_snapshot(vec![server("srv-1", "u1", "ok", 0)]);
        view.stage("ok", at(10));

        let visible = view.visible();
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[1].status, MessageStatus::Sending);
    }

    #[test]
    fn each_confirmed_message_claims_one_entry() {
        let mut view = state();
        view.stage("ok", at(0));
        let second = view.stage("ok", at(0));
        view.apply_snapshot(vec![server("srv-1", "u1", "ok", 1)]);

        let visible = view.visible();
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[1].id, MessageId::Local(second));
    }

    #[test]
    fn other_senders_never_hide_local_entries() {
        let mut view = state();
        view.stage("hello", at(0));
        view.apply_snapshot(vec![server("srv-1", "u2", "hello", 1)]);
        assert_eq!(view.visible().len(), 2);
    }

    #[test]
    fn failed_entries_stay_visible_and_are_retryable() {
        let mut view = state();
        let token = view.stage("hi", at(0));
        view.fail(&token, DeliveryFailure::Transient);
        view.apply_snapshot(vec![server("srv-9", "u1", "hi", 1)]);

        let failed: Vec<Message> = view
            .visible()
            .into_iter()
            .filter(|m| m.status == MessageStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].failure, Some(DeliveryFailure::Transient));

        assert_eq!(view.begin_retry(&token, at(2)), Some("hi".to_string()));
        assert_eq!(view.begin_retry(&token, at(2)), None);
        assert_eq!(view.pending_text(&token), Some("hi".to_string()));
    }

    #[test]
    fn fail_after_ack_is_ignored() {
        let mut view = state();
        let token = view.stage("hi", at(0));
        view.acknowledge(token, receipt("srv-1", 1));
        view.fail(&token, DeliveryFailure::Transient);
        assert_eq!(view.visible()[0].status, MessageStatus::Delivered);
    }

    #[test]
    fn duplicate_confirmed_ids_are_collapsed() {
        let mut view = state();
        view.apply_snapshot(vec![
            server("srv-1", "u2", "a", 0),
            server("srv-1", "u2", "a", 0),
            server("srv-2", "u2", "b", 1),
        ]);
        assert_eq!(view.visible().len(), 2);
    }

    #[test]
    fn ties_put_confirmed_first() {
        let mut view = state();
        let token = view.stage("mine", at(3));
        view.apply_snapshot(vec![server("srv-1", "u2", "theirs", 3)]);

        let visible = view.visible();
        assert_eq!(visible[0].id, MessageId::remote("srv-1"));
        assert_eq!(visible[1].id, MessageId::Local(token));
    }

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Land(usize),
        Ack(usize),
        Fail(usize),
        Retry(usize),
        OtherDevice,
    }

    fn script(index: usize, first_ok: bool, retry: bool, retry_ok: bool) -> VecDeque<Step> {
        let mut steps = VecDeque::new();
        if first_ok {
            steps.extend([Step::Land(index), Step::Ack(index)]);
            return steps;
        }
        steps.push_back(Step::Fail(index));
        if retry {
            steps.push_back(Step::Retry(index));
            if retry_ok {
                steps.extend([Step::Land(index), Step::Ack(index)]);
            } else {
                steps.push_back(Step::Fail(index));
            }
        }
        steps
    }

    proptest! {
        #[test]
        fn interleaved_acks_and_snapshots_never_lose_failures(
            scripts in proptest::collection::vec(
                ("[ab]", any::<bool>(), any::<bool>(), any::<bool>()),
                1..6,
            ),
            other_device in 0usize..3,
            choices in proptest::collection::vec(any::<u8>(), 64),
        ) {
            let mut view = state();
            let tokens: Vec<ClientToken> = scripts
                .iter()
                .map(|(text, ..)| view.stage(text.clone(), at(0)))
                .collect();
            let mut queues: Vec<VecDeque<Step>> = scripts
                .iter()
                .enumerate()
                .map(|(i, (_, first_ok, retry, retry_ok))| script(i, *first_ok, *retry, *retry_ok))
                .collect();
            queues.push((0..other_device).map(|_| Step::OtherDevice).collect());

            let mut remote: Vec<Message> = Vec::new();
            let mut receipts: HashMap<usize, MessageReceipt> = HashMap::new();
            let mut failed: HashSet<usize> = HashSet::new();
            let mut choices = choices.into_iter();
            let mut clock = 0;

            loop {
                let live: Vec<usize> = (0..queues.len()).filter(|q| !queues[*q].is_empty()).collect();
                if live.is_empty() {
                    break;
                }
                clock += 1;
                let choice = usize::from(choices.next().unwrap_or(1));
                if choice % 4 == 0 {
                    view.apply_snapshot(remote.clone());
                } else {
                    let queue = live[(choice / 4) % live.len()];
                    match queues[queue].pop_front() {
                        Some(Step::Land(i)) => {
                            let id = format!("srv-{}", remote.len());
                            remote.push(server(&id, "u1", &scripts[i].0, clock));
                            receipts.insert(i, receipt(&id, clock));
                        }
                        Some(Step::Ack(i)) => view.acknowledge(tokens[i], receipts[&i].clone()),
                        Some(Step::Fail(i)) => {
                            view.fail(&tokens[i], DeliveryFailure::Transient);
                            failed.insert(i);
                        }
                        Some(Step::Retry(i)) => {
                            prop_assert_eq!(
                                view.begin_retry(&tokens[i], at(clock)),
                                Some(scripts[i].0.clone())
                            );
                            failed.remove(&i);
                        }
                        Some(Step::OtherDevice) => {
                            let id = format!("srv-{}", remote.len());
                            remote.push(server(&id, "u1", "a", clock));
                        }
                        None => {}
                    }
                }

                let visible = view.visible();
                let mut ids: Vec<&str> = visible.iter().filter_map(|m| m.id.remote_id()).collect();
                let len = ids.len();
                ids.sort_unstable();
                ids.dedup();
                prop_assert_eq!(len, ids.len());
                for i in &failed {
                    let has_failed = visible.iter().any(|m| {
                        m.id == MessageId::Local(tokens[*i]) && m.status == MessageStatus::Failed
                    });
                    prop_assert!(has_failed);
                }
            }

            view.apply_snapshot(remote.clone());
            prop_assert_eq!(view.visible().len(), remote.len() + failed.len());
        }

        #[test]
        fn merge_never_duplicates_remote_ids(
            texts in proptest::collection::vec("[a-c]{1,2}", 1..8),
            acked in proptest::collection::vec(any::<bool>(), 8),
        ) {
            let mut view = state();
            let mut snapshot = Vec::new();
            for (i, text) in texts.iter().enumerate() {
                let token = view.stage(text.clone(), at(0));
                let id = format!("srv-{i}");
                if acked[i] {
                    view.acknowledge(token, receipt(&id, i as i64 + 1));
                }
                snapshot.push(server(&id, "u1", text, i as i64 + 1));
            }

            let before = view.visible();
            let mut remote: Vec<&str> = before.iter().filter_map(|m| m.id.remote_id()).collect();
            remote.sort_unstable();
            let len = remote.len();
            remote.dedup();
            prop_assert_eq!(len, remote.len());

            view.apply_snapshot(snapshot);
            let after = view.visible();
            prop_assert_eq!(after.len(), texts.len());
            prop_assert!(after.iter().all(|m| !m.is_local()));
        }
    }
}
