//! Feedback aggregation for citation ranking
//!
//! Keeps an append-only log of like/dislike events and aggregates them into
//! per-citation ratios consumed by the ranker. A later record for the same
//! (user, citation, session) logically overwrites the earlier one; nothing
//! is physically removed.
//!
//! Shared read-mostly across concurrent requests; aggregates are eventually
//! consistent and tolerate brief staleness.

use crate::domain::{FeedbackRecord, FeedbackType};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Like/dislike counts for one citation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeedbackStats {
    pub likes: u64,
    pub dislikes: u64,
}

impl FeedbackStats {
    /// Like ratio, or None when no feedback exists
    pub fn like_ratio(&self) -> Option<f32> {
        let total = self.likes + self.dislikes;
        if total == 0 {
            None
        } else {
            Some(self.likes as f32 / total as f32)
        }
    }
}

/// A point-in-time view of the aggregates, safe to hold across a ranking
/// pass. Ranking against a fixed snapshot keeps the pass deterministic.
#[derive(Debug, Clone, Default)]
pub struct FeedbackSnapshot {
    stats: HashMap<Uuid, FeedbackStats>,
}

impl FeedbackSnapshot {
    /// Empty snapshot; every citation reads as "no feedback"
    pub fn empty() -> Self {
        Self::default()
    }

    /// Stats for a citation, defaulting to zero counts
    pub fn stats_for(&self, citation_id: Uuid) -> FeedbackStats {
        self.stats.get(&citation_id).copied().unwrap_or_default()
    }

    /// Build a snapshot directly from stats, for tests and backfills
    pub fn from_stats(stats: HashMap<Uuid, FeedbackStats>) -> Self {
        Self { stats }
    }
}

#[derive(Default)]
struct FeedbackInner {
    /// Full append-only history
    log: Vec<FeedbackRecord>,

    /// Latest feedback per (user, citation, session); recency wins
    latest: HashMap<(Uuid, Uuid, Option<Uuid>), FeedbackType>,
}

/// Shared feedback store
#[derive(Default)]
pub struct FeedbackStore {
    inner: RwLock<FeedbackInner>,
}

impl FeedbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one feedback event
    pub fn record(&self, record: FeedbackRecord) {
        let mut inner = self.inner.write().expect("feedback lock poisoned");
        inner.latest.insert(
            (record.user_id, record.citation_id, record.session_id),
            record.feedback_type,
        );
        inner.log.push(record);
    }

    /// Total recorded events (including superseded ones)
    pub fn event_count(&self) -> usize {
        self.inner.read().expect("feedback lock poisoned").log.len()
    }

    /// Aggregate the latest-wins view into a snapshot
    pub fn snapshot(&self) -> FeedbackSnapshot {
        let inner = self.inner.read().expect("feedback lock poisoned");
        let mut stats: HashMap<Uuid, FeedbackStats> = HashMap::new();

        for ((_, citation_id, _), feedback_type) in inner.latest.iter() {
            let entry = stats.entry(*citation_id).or_default();
            match feedback_type {
                FeedbackType::Like => entry.likes += 1,
                FeedbackType::Dislike => entry.dislikes += 1,
            }
        }

        FeedbackSnapshot { stats }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use chrono::Utc;

    fn record(user: Uuid, citation: Uuid, feedback_type: FeedbackType) -> FeedbackRecord {
        FeedbackRecord {
            citation_id: citation,
            domain: Domain::Hr,
            feedback_type,
            user_id: user,
            session_id: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_like_ratio() {
        let stats = FeedbackStats { likes: 3, dislikes: 1 };
        assert_eq!(stats.like_ratio(), Some(0.75));
        assert_eq!(FeedbackStats::default().like_ratio(), None);
    }

    #[test]
    fn test_latest_record_wins() {
        let store = FeedbackStore::new();
        let user = Uuid::new_v4();
        let citation = Uuid::new_v4();

        store.record(record(user, citation, FeedbackType::Like));
        store.record(record(user, citation, FeedbackType::Dislike));

        // Log keeps both, aggregate sees only the newest
        assert_eq!(store.event_count(), 2);
        let stats = store.snapshot().stats_for(citation);
        assert_eq!(stats, FeedbackStats { likes: 0, dislikes: 1 });
    }

    #[test]
    fn test_aggregates_across_users() {
        let store = FeedbackStore::new();
        let citation = Uuid::new_v4();

        for _ in 0..3 {
            store.record(record(Uuid::new_v4(), citation, FeedbackType::Like));
        }
        store.record(record(Uuid::new_v4(), citation, FeedbackType::Dislike));

        let stats = store.snapshot().stats_for(citation);
        assert_eq!(stats.likes, 3);
        assert_eq!(stats.dislikes, 1);
        assert_eq!(stats.like_ratio(), Some(0.75));
    }

    #[test]
    fn test_unknown_citation_defaults_to_zero() {
        let snapshot = FeedbackStore::new().snapshot();
        assert_eq!(snapshot.stats_for(Uuid::new_v4()), FeedbackStats::default());
    }
}
