//! Debounced search over a feed's visible messages

use std::sync::Arc;
use std::time::Duration;

use parley_protocol::Message;

use crate::debounce::Debouncer;
use crate::feed::MessageFeed;
use crate::view::SharedView;

/// Case-insensitive substring match. A blank query matches nothing.
pub fn search_messages(messages: &[Message], query: &str) -> Vec<Message> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    messages
        .iter()
        .filter(|m| m.text.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

/// Runs a search against the feed once typing pauses.
pub struct MessageSearch {
    debouncer: Debouncer<String>,
}

impl MessageSearch {
    pub fn new<F>(feed: &MessageFeed, delay: Duration, on_results: F) -> Self
    where
        F: Fn(String, Vec<Message>) + Send + Sync + 'static,
    {
        Self::over(feed.shared_view(), delay, on_results)
    }

    fn over<F>(view: Arc<SharedView>, delay: Duration, on_results: F) -> Self
    where
        F: Fn(String, Vec<Message>) + Send + Sync + 'static,
    {
        let debouncer = Debouncer::new(delay, move |query: String| {
            let results = search_messages(&view.visible(), &query);
            on_results(query, results);
        });
        Self { debouncer }
    }

    /// Feed one keystroke's worth of query text.
    pub fn input(&mut self, query: impl Into<String>) {
        self.debouncer.push(query.into());
    }

    pub fn cancel(&mut self) {
        self.debouncer.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use tokio::time::advance;

    use super::*;

    fn message(id: &str, text: &str) -> Message {
        Message::confirmed(
            id,
            "u1_u2".parse().unwrap(),
            "u2".parse().unwrap(),
            text,
            Utc::now(),
        )
    }

    #[test]
    fn search_is_case_insensitive() {
        let messages = vec![message("1", "Brand Deal?"), message("2", "hello")];
        let hits = search_messages(&messages, "  brand ");
        assert_eq!(hits.len(), 1);
        assert!(search_messages(&messages, "   ").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn only_final_query_runs() {
        let view = SharedView::new("u1_u2".parse().unwrap(), "u1".parse().unwrap());
        view.update(|s| s.apply_snapshot(vec![message("1", "collab offer"), message("2", "coffee")]));

        let runs: Arc<Mutex<Vec<(String, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&runs);
        let mut search = MessageSearch::over(view, Duration::from_millis(300), move |q, hits| {
            sink.lock().unwrap().push((q, hits.len()))
        });

        search.input("c");
        advance(Duration::from_millis(100)).await;
        search.input("co");
        advance(Duration::from_millis(100)).await;
        search.input("col");
        advance(Duration::from_millis(300)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert_eq!(*runs.lock().unwrap(), vec![("col".to_string(), 1)]);
    }
}
