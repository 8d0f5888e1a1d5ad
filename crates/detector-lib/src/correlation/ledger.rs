//! Dedup ledger of reported rollout revisions

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Revisions that already produced an incident, with the time they were reported
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupLedger {
    reported: HashMap<String, DateTime<Utc>>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if an incident was already emitted for `revision_id`
    pub fn contains(&self, revision_id: &str) -> bool {
        self.reported.contains_key(revision_id)
    }

    /// Record that an incident for `revision_id` was emitted at `reported_at`
    ///
    /// Returns false if the revision was already present.
    pub fn record(&mut self, revision_id: &str, reported_at: DateTime<Utc>) -> bool {
        if self.contains(revision_id) {
            return false;
        }
        self.reported.insert(revision_id.to_string(), reported_at);
        true
    }

    /// Drop entries reported before `cutoff`, returning how many were removed
    pub fn evict_reported_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.reported.len();
        self.reported.retain(|_, reported_at| *reported_at >= cutoff);
        before - self.reported.len()
    }

    /// When the incident for `revision_id` was reported
    pub fn reported_at(&self, revision_id: &str) -> Option<DateTime<Utc>> {
        self.reported.get(revision_id).copied()
    }

    /// Reported revision IDs in lexicographic order
    pub fn revisions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.reported.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.reported.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reported.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_is_one_way() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut ledger = DedupLedger::new();

        assert!(ledger.record("rs-1", now));
        assert!(!ledger.record("rs-1", now + chrono::Duration::minutes(1)));
        assert_eq!(ledger.reported_at("rs-1"), Some(now));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_eviction_keeps_recent_entries() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut ledger = DedupLedger::new();
        ledger.record("rs-old", now - chrono::Duration::minutes(30));
        ledger.record("rs-new", now - chrono::Duration::minutes(5));

        let evicted = ledger.evict_reported_before(now - chrono::Duration::minutes(20));

        assert_eq!(evicted, 1);
        assert_eq!(ledger.revisions(), vec!["rs-new".to_string()]);
    }
}
