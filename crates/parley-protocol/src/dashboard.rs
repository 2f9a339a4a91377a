//! Precomputed dashboard aggregates produced by the aggregation job.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ConversationId, UserId};
use crate::message::{Category, OpportunityKind, SentimentLabel};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaqMetrics {
    pub detected: u64,
    pub auto_responded: u64,
}

impl FaqMetrics {
    /// Share of detected FAQs that were answered automatically, in percent.
    pub fn auto_response_rate(&self) -> f64 {
        if self.detected == 0 {
            0.0
        } else {
            self.auto_responded as f64 * 100.0 / self.detected as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceMetrics {
    pub drafts_generated: u64,
    pub drafts_accepted: u64,
}

impl VoiceMetrics {
    pub fn acceptance_rate(&self) -> f64 {
        if self.drafts_generated == 0 {
            0.0
        } else {
            self.drafts_accepted as f64 * 100.0 / self.drafts_generated as f64
        }
    }
}

/// Change against the previous period, in percent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodDeltas {
    pub messages: f64,
    pub opportunities: f64,
    pub faq_auto_responses: f64,
}

impl PeriodDeltas {
    pub fn percent_change(previous: u64, current: u64) -> f64 {
        if previous == 0 {
            if current == 0 {
                0.0
            } else {
                100.0
            }
        } else {
            (current as f64 - previous as f64) * 100.0 / previous as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub user_id: UserId,
    pub total_messages: u64,
    #[serde(default)]
    pub by_category: BTreeMap<Category, u64>,
    #[serde(default)]
    pub by_sentiment: BTreeMap<SentimentLabel, u64>,
    #[serde(default)]
    pub faq: FaqMetrics,
    #[serde(default)]
    pub voice: VoiceMetrics,
    #[serde(default)]
    pub deltas: PeriodDeltas,
    pub generated_at: DateTime<Utc>,
}

impl DashboardSummary {
    pub fn empty(user_id: UserId, generated_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            total_messages: 0,
            by_category: BTreeMap::new(),
            by_sentiment: BTreeMap::new(),
            faq: FaqMetrics::default(),
            voice: VoiceMetrics::default(),
            deltas: PeriodDeltas::default(),
            generated_at,
        }
    }

    pub fn category_count(&self, category: Category) -> u64 {
        self.by_category.get(&category).copied().unwrap_or(0)
    }
}

/// A message the AI collaborators flagged as a business opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub message_id: String,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub score: u8,
    pub kind: OpportunityKind,
    pub preview: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_handle_zero_denominators() {
        assert_eq!(FaqMetrics::default().auto_response_rate(), 0.0);
        assert_eq!(VoiceMetrics::default().acceptance_rate(), 0.0);

        let faq = FaqMetrics {
            detected: 8,
            auto_responded: 2,
        };
        assert_eq!(faq.auto_response_rate(), 25.0);
    }

    #[test]
    fn percent_change_from_previous_period() {
        assert_eq!(PeriodDeltas::percent_change(0, 0), 0.0);
        assert_eq!(PeriodDeltas::percent_change(0, 3), 100.0);
        assert_eq!(PeriodDeltas::percent_change(10, 15), 50.0);
        assert_eq!(PeriodDeltas::percent_change(10, 5), -50.0);
    }

    #[test]
    fn summary_round_trips_through_json_cache_format() {
        let mut summary = DashboardSummary::empty("u1".parse().unwrap(), Utc::now());
        summary.by_category.insert(Category::Business, 4);
        summary.total_messages = 9;

        let encoded = serde_json::to_value(&summary).unwrap();
        assert_eq!(encoded["byCategory"]["business"], 4);
        assert_eq!(encoded["totalMessages"], 9);

        let decoded: DashboardSummary = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.category_count(Category::Business), 4);
        assert_eq!(decoded.category_count(Category::Spam), 0);
    }
}
