//! Oldest-first eviction of reusable scenes under critical pressure.
//!
//! Only scenes older than the minimum age and in an evictable state
//! (`Loaded` or `Paused`) are candidates. The active scene and scenes still
//! being set up are never selected. Each pass destroys a bounded share of the
//! candidates so that persistent pressure is handled over several passes.

use serde::{Deserialize, Serialize};

use crate::core::scene_record::{SceneId, SceneRecord};

/// How many of `n` candidates one pass may destroy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EvictionBudget {
    /// `min(n / 2 + 1, n)`.
    #[default]
    HalfPlusOne,
    /// `ceil(n / 2)`.
    HalfRoundedUp,
}

impl EvictionBudget {
    pub fn count(&self, candidates: usize) -> usize {
        match self {
            EvictionBudget::HalfPlusOne => (candidates / 2 + 1).min(candidates),
            EvictionBudget::HalfRoundedUp => candidates.div_ceil(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub min_age_ms: u64,
    pub budget: EvictionBudget,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            min_age_ms: 30_000,
            budget: EvictionBudget::HalfPlusOne,
        }
    }
}

impl EvictionPolicy {
    pub fn new(min_age_ms: u64, budget: EvictionBudget) -> Self {
        Self { min_age_ms, budget }
    }

    /// Picks the scenes to destroy, oldest first.
    ///
    /// `active` is excluded even if its recorded state says otherwise.
    pub fn select_victims<'a, I>(&self, records: I, active: Option<&str>, now_ms: u64) -> Vec<SceneId>
    where
        I: IntoIterator<Item = &'a SceneRecord>,
    {
        let mut candidates: Vec<&SceneRecord> = records
            .into_iter()
            .filter(|record| record.state.is_evictable())
            .filter(|record| active != Some(record.id.as_str()))
            .filter(|record| record.age_ms(now_ms) > self.min_age_ms)
            .collect();

        candidates.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });

        let take = self.budget.count(candidates.len());
        candidates
            .into_iter()
            .take(take)
            .map(|record| record.id.clone())
            .collect()
    }
}
