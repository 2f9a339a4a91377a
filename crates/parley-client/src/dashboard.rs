//! Dashboard summaries with a local cache fallback
//!
//! Fresh data always wins. When the aggregation service cannot be reached
//! the last cached summary is shown regardless of age, flagged stale when
//! it is past its TTL.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parley_protocol::{DashboardSummary, Opportunity, UserId};
use parley_store::{LocalCache, SummarySource};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::millis;
use crate::debounce::throttle;
use crate::error::ClientResult;
use crate::metrics::DASHBOARD_LOADS;
use crate::subscription::Subscription;

const SUMMARY_PREFIX: &str = "dashboard_summary:";
const OPPORTUNITIES_PREFIX: &str = "opportunities:";

fn summary_key(user: &UserId) -> String {
    format!("{SUMMARY_PREFIX}{user}")
}

// Trailing separator so clearing `u1` leaves `u10` alone.
fn opportunities_prefix(user: &UserId) -> String {
    format!("{OPPORTUNITIES_PREFIX}{user}:")
}

fn opportunities_key(user: &UserId) -> String {
    format!("{}top", opportunities_prefix(user))
}

fn age_within(cached_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    chrono::Duration::from_std(ttl).is_ok_and(|ttl| now.signed_duration_since(cached_at) <= ttl)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSummary {
    pub summary: DashboardSummary,
    pub cached_at: DateTime<Utc>,
}

impl CachedSummary {
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        age_within(self.cached_at, ttl, now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedOpportunities {
    pub opportunities: Vec<Opportunity>,
    pub cached_at: DateTime<Utc>,
}

impl CachedOpportunities {
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        age_within(self.cached_at, ttl, now)
    }
}

/// Typed view over a `LocalCache` for dashboard data.
#[derive(Clone)]
pub struct DashboardCache {
    cache: Arc<dyn LocalCache>,
}

impl DashboardCache {
    pub fn new(cache: Arc<dyn LocalCache>) -> Self {
        Self { cache }
    }

    pub async fn get_cached_summary(&self, user: &UserId) -> Option<CachedSummary> {
        self.read(&summary_key(user)).await
    }

    pub async fn cache_summary(&self, user: &UserId, summary: &DashboardSummary) -> ClientResult<()> {
        let entry = CachedSummary {
            summary: summary.clone(),
            cached_at: Utc::now(),
        };
        self.write(&summary_key(user), &entry).await
    }

    pub async fn get_cached_opportunities(&self, user: &UserId) -> Option<CachedOpportunities> {
        self.read(&opportunities_key(user)).await
    }

    pub async fn cache_opportunities(
        &self,
        user: &UserId,
        opportunities: &[Opportunity],
    ) -> ClientResult<()> {
        let entry = CachedOpportunities {
            opportunities: opportunities.to_vec(),
            cached_at: Utc::now(),
        };
        self.write(&opportunities_key(user), &entry).await
    }

    /// Drop the summary and every opportunity list of `user`.
    pub async fn clear_cache(&self, user: &UserId) -> ClientResult<usize> {
        let mut removed = usize::from(self.cache.remove(&summary_key(user)).await?);
        for key in self.cache.keys_with_prefix(&opportunities_prefix(user)).await? {
            removed += usize::from(self.cache.remove(&key).await?);
        }
        debug!(user = %user, removed, "Dashboard cache cleared");
        Ok(removed)
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = match self.cache.get(key).await {
            Ok(value) => value?,
            Err(err) => {
                warn!(key, error = %err, "Cache read failed");
                return None;
            }
        };
        match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(key, error = %err, "Discarding malformed cache entry");
                None
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, entry: &T) -> ClientResult<()> {
        let value = serde_json::to_value(entry).map_err(parley_store::StoreError::from)?;
        self.cache.set(key, value).await?;
        Ok(())
    }
}

/// What the dashboard screen should render.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardView {
    Fresh(DashboardSummary),
    Cached {
        summary: DashboardSummary,
        cached_at: DateTime<Utc>,
        stale: bool,
    },
    Empty,
}

impl DashboardView {
    pub fn summary(&self) -> Option<&DashboardSummary> {
        match self {
            DashboardView::Fresh(summary) | DashboardView::Cached { summary, .. } => Some(summary),
            DashboardView::Empty => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, DashboardView::Cached { stale: true, .. })
    }
}

pub struct DashboardService {
    source: Arc<dyn SummarySource>,
    cache: DashboardCache,
    ttl: Duration,
    throttle: Duration,
}

impl DashboardService {
    pub fn new(source: Arc<dyn SummarySource>, cache: Arc<dyn LocalCache>) -> Self {
        Self {
            source,
            cache: DashboardCache::new(cache),
            ttl: parley_protocol::DASHBOARD_CACHE_TTL,
            throttle: Duration::from_secs(1),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn cache(&self) -> &DashboardCache {
        &self.cache
    }

    /// Fetch, falling back to the cache of any age, then to `Empty`.
    pub async fn load(&self, user: &UserId) -> DashboardView {
        match self.source.fetch_summary(user).await {
            Ok(summary) => {
                if let Err(err) = self.cache.cache_summary(user, &summary).await {
                    warn!(user = %user, error = %err, "Failed to cache dashboard summary");
                }
                DASHBOARD_LOADS.with_label_values(&["fresh"]).inc();
                DashboardView::Fresh(summary)
            }
            Err(err) => {
                warn!(user = %user, error = %err, "Dashboard fetch failed, using cache");
                self.from_cache(user).await
            }
        }
    }

    /// Serve a cache entry within its TTL without fetching; otherwise `load`.
    pub async fn load_fast(&self, user: &UserId) -> DashboardView {
        if let Some(cached) = self.cache.get_cached_summary(user).await {
            if cached.is_fresh(self.ttl, Utc::now()) {
                DASHBOARD_LOADS.with_label_values(&["cache_hit"]).inc();
                return DashboardView::Cached {
                    summary: cached.summary,
                    cached_at: cached.cached_at,
                    stale: false,
                };
            }
        }
        DASHBOARD_LOADS.with_label_values(&["cache_miss"]).inc();
        self.load(user).await
    }

    /// Forget cached data and fetch again.
    pub async fn refresh(&self, user: &UserId) -> DashboardView {
        if let Err(err) = self.cache.clear_cache(user).await {
            warn!(user = %user, error = %err, "Failed to clear dashboard cache");
        }
        info!(user = %user, "Dashboard refresh");
        self.load(user).await
    }

    /// Highest-scoring opportunities with the same fallback as `load`.
    pub async fn opportunities(&self, user: &UserId, limit: usize) -> Vec<Opportunity> {
        match self.source.fetch_opportunities(user, limit).await {
            Ok(opportunities) => {
                if let Err(err) = self.cache.cache_opportunities(user, &opportunities).await {
                    warn!(user = %user, error = %err, "Failed to cache opportunities");
                }
                opportunities
            }
            Err(err) => {
                warn!(user = %user, error = %err, "Opportunity fetch failed, using cache");
                self.cache
                    .get_cached_opportunities(user)
                    .await
                    .map(|cached| cached.opportunities.into_iter().take(limit).collect())
                    .unwrap_or_default()
            }
        }
    }

    /// Throttled real-time summaries; each delivered one is also cached.
    pub async fn watch<F>(&self, user: &UserId, on_change: F) -> ClientResult<Subscription>
    where
        F: FnMut(DashboardSummary) + Send + 'static,
    {
        let updates = throttle(self.source.subscribe(user).await?, self.throttle);
        let cache = self.cache.clone();
        let owner = user.clone();
        let cached = updates.then(move |summary| {
            let cache = cache.clone();
            let owner = owner.clone();
            async move {
                if let Err(err) = cache.cache_summary(&owner, &summary).await {
                    warn!(user = %owner, error = %err, "Failed to cache pushed summary");
                }
                summary
            }
        });
        info!(user = %user, throttle_ms = millis(self.throttle), "Watching dashboard");
        Ok(Subscription::spawn(cached, on_change))
    }

    async fn from_cache(&self, user: &UserId) -> DashboardView {
        match self.cache.get_cached_summary(user).await {
            Some(cached) => {
                let stale = !cached.is_fresh(self.ttl, Utc::now());
                DASHBOARD_LOADS.with_label_values(&["fallback"]).inc();
                DashboardView::Cached {
                    summary: cached.summary,
                    cached_at: cached.cached_at,
                    stale,
                }
            }
            None => {
                DASHBOARD_LOADS.with_label_values(&["empty"]).inc();
                DashboardView::Empty
            }
        }
    }
}
