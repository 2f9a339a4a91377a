//! Dashboard aggregation source abstraction

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parley_protocol::{DashboardSummary, Opportunity, UserId};
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::registry::{ChannelRegistry, SnapshotStream};

/// Precomputed metrics owned by the aggregation job and AI services.
#[async_trait]
pub trait SummarySource: Send + Sync {
    async fn fetch_summary(&self, user: &UserId) -> StoreResult<DashboardSummary>;

    /// Highest-scoring opportunities first.
    async fn fetch_opportunities(&self, user: &UserId, limit: usize)
        -> StoreResult<Vec<Opportunity>>;

    /// Summary pushes as the aggregation job recomputes them.
    async fn subscribe(&self, user: &UserId) -> StoreResult<SnapshotStream<DashboardSummary>>;
}

/// Summary source backed by values set by hand.
pub struct StaticSummarySource {
    summaries: RwLock<HashMap<UserId, DashboardSummary>>,
    opportunities: RwLock<HashMap<UserId, Vec<Opportunity>>>,
    channels: ChannelRegistry<UserId, Option<DashboardSummary>>,
    available: AtomicBool,
    fetches: AtomicUsize,
}

impl StaticSummarySource {
    pub fn new() -> Self {
        Self {
            summaries: RwLock::new(HashMap::new()),
            opportunities: RwLock::new(HashMap::new()),
            channels: ChannelRegistry::new(),
            available: AtomicBool::new(true),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Store a new summary and push it to subscribers.
    pub async fn set_summary(&self, summary: DashboardSummary) {
        let user = summary.user_id.clone();
        let mut summaries = self.summaries.write().await;
        summaries.insert(user.clone(), summary.clone());
        self.channels.publish(&user, Some(summary));
    }

    pub async fn set_opportunities(&self, user: UserId, opportunities: Vec<Opportunity>) {
        self.opportunities.write().await.insert(user, opportunities);
    }

    /// Simulate the aggregation or AI service going down.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fetch calls received so far, successful or not.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> StoreResult<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("aggregation service is down".to_string()))
        }
    }
}

impl Default for StaticSummarySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SummarySource for StaticSummarySource {
    async fn fetch_summary(&self, user: &UserId) -> StoreResult<DashboardSummary> {
        self.check_available()?;
        self.summaries
            .read()
            .await
            .get(user)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("no summary for {user}")))
    }

    async fn fetch_opportunities(
        &self,
        user: &UserId,
        limit: usize,
    ) -> StoreResult<Vec<Opportunity>> {
        self.check_available()?;
        let mut opportunities = self
            .opportunities
            .read()
            .await
            .get(user)
            .cloned()
            .unwrap_or_default();
        opportunities.sort_by(|a, b| b.score.cmp(&a.score));
        opportunities.truncate(limit);
        Ok(opportunities)
    }

    async fn subscribe(&self, user: &UserId) -> StoreResult<SnapshotStream<DashboardSummary>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("aggregation service is down".to_string()));
        }
        let summaries = self.summaries.read().await;
        let stream = self
            .channels
            .subscribe(user.clone(), || summaries.get(user).cloned());
        Ok(Box::pin(stream.filter_map(|summary| async move { summary })))
    }
}
