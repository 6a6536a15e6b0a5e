//! Ordered Set
//!
//! A local sorted set: unique values, each with a score, ordered by
//! `(score, value)`. A hash map answers "what is this value's score" while
//! the skiplist answers every ordering query.

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::{CorvidError, Result};
use super::list::SkipList;

/// What an insert did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    Updated { previous: f64 },
    Unchanged,
}

#[derive(Debug)]
pub struct OrderedSet<V> {
    scores: HashMap<V, f64>,
    list: SkipList<V>,
}

impl<V: Ord + Hash + Clone> Default for OrderedSet<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Ord + Hash + Clone> OrderedSet<V> {
    pub fn new() -> Self {
        Self::from_list(SkipList::new())
    }

    pub fn with_expected_size(expected_size: usize) -> Self {
        Self::from_list(SkipList::with_expected_size(expected_size))
    }

    pub fn with_seed(expected_size: usize, seed: u64) -> Self {
        Self::from_list(SkipList::with_seed(expected_size, seed))
    }

    fn from_list(list: SkipList<V>) -> Self {
        Self {
            scores: HashMap::new(),
            list,
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn contains(&self, value: &V) -> bool {
        self.scores.contains_key(value)
    }

    pub fn score(&self, value: &V) -> Option<f64> {
        self.scores.get(value).copied()
    }

    /// Add `value` with `score`, or move it to `score`
    ///
    /// Re-inserting with the same score changes nothing.
    pub fn insert(&mut self, value: V, score: f64) -> Result<InsertOutcome> {
        if score.is_nan() {
            return Err(CorvidError::InvalidArgument("score is NaN".to_string()));
        }

        let outcome = match self.scores.get(&value).copied() {
            Some(previous) if previous == score => return Ok(InsertOutcome::Unchanged),
            Some(previous) => {
                self.list.remove(previous, &value);
                InsertOutcome::Updated { previous }
            }
            None => InsertOutcome::Inserted,
        };

        self.list.insert(score, value.clone())?;
        self.scores.insert(value, score);
        Ok(outcome)
    }

    /// Add `delta` to the score (missing values start at zero)
    pub fn increment(&mut self, value: V, delta: f64) -> Result<f64> {
        let score = self.score(&value).unwrap_or(0.0) + delta;
        if score.is_nan() {
            return Err(CorvidError::InvalidArgument(
                "increment would make the score NaN".to_string(),
            ));
        }
        self.insert(value, score)?;
        Ok(score)
    }

    /// Remove a value, returning its score
    pub fn remove(&mut self, value: &V) -> Option<f64> {
        let score = self.scores.remove(value)?;
        self.list.remove(score, value);
        Some(score)
    }

    /// Remove and return the lowest-ordered value
    pub fn pop_first(&mut self) -> Option<(V, f64)> {
        let (score, value) = self.list.pop_first()?;
        self.scores.remove(&value);
        Some((value, score))
    }

    pub fn clear(&mut self) {
        self.scores.clear();
        self.list.clear();
    }

    /// 0-based position in ascending order
    pub fn rank(&self, value: &V) -> Option<usize> {
        let score = self.score(value)?;
        self.list.rank(score, value)
    }

    /// 0-based position in descending order
    pub fn rev_rank(&self, value: &V) -> Option<usize> {
        self.rank(value).map(|rank| self.len() - 1 - rank)
    }

    pub fn get_by_rank(&self, rank: usize) -> Option<(&V, f64)> {
        self.list.get_by_rank(rank).map(|(score, value)| (value, score))
    }

    /// Values with ranks in `start..=stop`
    pub fn range_by_rank(&self, start: usize, stop: usize) -> Vec<(&V, f64)> {
        swap_pairs(self.list.range_by_rank(start, stop))
    }

    /// Values with `min <= score <= max`
    pub fn range_by_score(&self, min: f64, max: f64) -> Vec<(&V, f64)> {
        swap_pairs(self.list.range_by_score(min, max))
    }

    /// Values in ascending order
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&V, f64)> + '_ {
        self.list.iter().map(|(score, value)| (value, score))
    }
}

fn swap_pairs<V>(entries: Vec<(f64, &V)>) -> Vec<(&V, f64)> {
    entries.into_iter().map(|(score, value)| (value, score)).collect()
}
