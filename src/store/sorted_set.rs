//! Sorted-set collaborator contract and in-memory implementation.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::StoreError;

/// One member of a sorted set together with its score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredMember {
    pub member: String,
    pub score: i64,
}

/// A named collection of members ordered by an integer score.
///
/// Members are unique within a set; re-adding a member replaces its score.
/// Range reads return entries in ascending `(score, member)` order.
#[async_trait]
pub trait SortedSetStore: Send + Sync {
    /// Inserts `member` with `score`, replacing any previous score.
    async fn add(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError>;

    /// Number of members in the set.
    async fn card(&self, key: &str) -> Result<i64, StoreError>;

    /// Members with score <= `max`, skipping `offset`, at most `limit`,
    /// in ascending `(score, member)` order.
    async fn range_by_score(
        &self,
        key: &str,
        max: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError>;

    /// Removes every member with score <= `max`; returns the removed count.
    async fn remove_by_score(&self, key: &str, max: i64) -> Result<i64, StoreError>;
}

/// In-memory [`SortedSetStore`] over `BTreeSet<(score, member)>`.
#[derive(Debug, Default)]
pub struct MemorySortedSet {
    sets: RwLock<HashMap<String, BTreeSet<(i64, String)>>>,
}

impl MemorySortedSet {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SortedSetStore for MemorySortedSet {
    async fn add(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        let mut sets = self.sets.write();
        let set = sets.entry(key.to_string()).or_default();
        set.retain(|(_, m)| m != member);
        set.insert((score, member.to_string()));
        Ok(())
    }

    async fn card(&self, key: &str) -> Result<i64, StoreError> {
        Ok(self.sets.read().get(key).map_or(0, |s| s.len() as i64))
    }

    async fn range_by_score(
        &self,
        key: &str,
        max: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let sets = self.sets.read();
        let Some(set) = sets.get(key) else {
            return Ok(Vec::new());
        };
        Ok(set
            .iter()
            .take_while(|(score, _)| *score <= max)
            .skip(offset)
            .take(limit)
            .map(|(score, member)| ScoredMember {
                member: member.clone(),
                score: *score,
            })
            .collect())
    }

    async fn remove_by_score(&self, key: &str, max: i64) -> Result<i64, StoreError> {
        let mut sets = self.sets.write();
        let Some(set) = sets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|(score, _)| *score > max);
        Ok((before - set.len()) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_card() {
        let store = MemorySortedSet::new();
        store.add("q", "a", 10).await.unwrap();
        store.add("q", "b", 5).await.unwrap();

        assert_eq!(store.card("q").await.unwrap(), 2);
        assert_eq!(store.card("other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn re_adding_member_replaces_score() {
        let store = MemorySortedSet::new();
        store.add("q", "a", 10).await.unwrap();
        store.add("q", "a", 3).await.unwrap();

        assert_eq!(store.card("q").await.unwrap(), 1);
        let items = store.range_by_score("q", 100, 0, 10).await.unwrap();
        assert_eq!(items[0].score, 3);
    }

    #[tokio::test]
    async fn range_is_ascending_and_bounded() {
        let store = MemorySortedSet::new();
        store.add("q", "late", 30).await.unwrap();
        store.add("q", "early", 10).await.unwrap();
        store.add("q", "mid", 20).await.unwrap();
        store.add("q", "future", 99).await.unwrap();

        let items = store.range_by_score("q", 30, 0, 10).await.unwrap();
        let members: Vec<_> = items.iter().map(|i| i.member.as_str()).collect();
        assert_eq!(members, vec!["early", "mid", "late"]);
    }

    #[tokio::test]
    async fn range_offset_and_limit_page_through() {
        let store = MemorySortedSet::new();
        for i in 0..5 {
            store.add("q", &format!("m{i}"), i).await.unwrap();
        }

        let first = store.range_by_score("q", 10, 0, 2).await.unwrap();
        let second = store.range_by_score("q", 10, 2, 2).await.unwrap();
        let third = store.range_by_score("q", 10, 4, 2).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].member, "m4");
    }

    #[tokio::test]
    async fn remove_by_score_drops_due_members_only() {
        let store = MemorySortedSet::new();
        store.add("q", "due", 10).await.unwrap();
        store.add("q", "later", 50).await.unwrap();

        assert_eq!(store.remove_by_score("q", 20).await.unwrap(), 1);
        assert_eq!(store.card("q").await.unwrap(), 1);

        let rest = store.range_by_score("q", 100, 0, 10).await.unwrap();
        assert_eq!(rest[0].member, "later");
    }
}
