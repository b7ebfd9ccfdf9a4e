//! In-memory progression ledger
//!
//! Plain map from member to record. Persistence is the caller's job; the
//! `Engine` wraps every mutation here with a store save.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::leveling::{apply_experience, LevelChange};
use super::{CurrencyKind, MemberId, ProgressionRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    records: HashMap<MemberId, ProgressionRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, member_id: &str) -> Option<&ProgressionRecord> {
        self.records.get(member_id)
    }

    /// Record for `member_id`, inserting a fresh level-1 record if absent
    pub fn get_or_create(&mut self, member_id: &str) -> &mut ProgressionRecord {
        self.records.entry(member_id.to_string()).or_default()
    }

    pub fn grant_experience(&mut self, member_id: &str, amount: u64, max_level: u32) -> LevelChange {
        let record = self.get_or_create(member_id);
        apply_experience(record, amount, max_level)
    }

    pub fn adjust_currency(&mut self, member_id: &str, kind: CurrencyKind, delta: i64) -> u64 {
        self.get_or_create(member_id).adjust(kind, delta)
    }

    /// Administrative override: clamp into `[1, max_level]`, reset xp.
    /// Lifetime `total_xp` is left untouched.
    pub fn set_level(&mut self, member_id: &str, level: u32, max_level: u32) -> LevelChange {
        let record = self.get_or_create(member_id);
        let previous = record.level;
        record.level = level.clamp(1, max_level.max(1));
        record.xp = 0;
        LevelChange {
            previous,
            current: record.level,
        }
    }

    /// Members ordered by level, then xp (both descending), then id.
    pub fn leaderboard(&self, limit: usize) -> Vec<(MemberId, ProgressionRecord)> {
        let mut entries: Vec<_> = self
            .records
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();
        entries.sort_by(|(a_id, a), (b_id, b)| {
            b.level
                .cmp(&a.level)
                .then(b.xp.cmp(&a.xp))
                .then(a_id.cmp(b_id))
        });
        entries.truncate(limit);
        entries
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MemberId, &ProgressionRecord)> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_zero_record() {
        let mut ledger = Ledger::new();
        assert!(ledger.get("1").is_none());
        let record = ledger.get_or_create("1").clone();
        assert_eq!(record, ProgressionRecord::default());
        assert_eq!(record.level, 1);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_set_level_clamps() {
        let mut ledger = Ledger::new();
        ledger.grant_experience("1", 150, 100);
        let change = ledger.set_level("1", 500, 100);
        assert_eq!(change, LevelChange { previous: 2, current: 100 });
        let record = ledger.get("1").unwrap();
        assert_eq!(record.xp, 0);
        assert_eq!(record.total_xp, 150);

        ledger.set_level("1", 0, 100);
        assert_eq!(ledger.get("1").unwrap().level, 1);
    }

    #[test]
    fn test_leaderboard_order() {
        let mut ledger = Ledger::new();
        ledger.grant_experience("a", 50, 9999);
        ledger.grant_experience("b", 500, 9999);
        ledger.grant_experience("c", 50, 9999);
        ledger.grant_experience("d", 120, 9999);

        let board: Vec<_> = ledger.leaderboard(3).into_iter().map(|(id, _)| id).collect();
        assert_eq!(board, vec!["b", "d", "a"]);
    }
}
