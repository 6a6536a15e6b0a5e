//! Skiplist
//!
//! Nodes live in an arena and link to each other by index. Every forward
//! link records its width: how many base-level steps it skips. Summing the
//! widths crossed during a descent gives a node's rank in O(log n).
//!
//! ```text
//! level 2  HEAD ─────────(3)────────▶ c ──────(2)─────▶ ∅
//! level 1  HEAD ──(1)──▶ a ──(2)────▶ c ──(1)──▶ d ──▶ ∅
//! level 0  HEAD ──(1)──▶ a ─▶ b ────▶ c ──────▶ d ──▶ e
//! ```
//!
//! Entries are ordered by `(score, value)`; equal scores are ordered by
//! value.

use std::cmp::Ordering;

use crate::error::{CorvidError, Result};
use super::level::{LevelGenerator, MAX_LEVEL};

/// Sentinel index of the head node
const HEAD: usize = usize::MAX;

/// Expected size used when none is given
const DEFAULT_EXPECTED_SIZE: usize = 1 << 16;

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    next: Option<usize>,
    width: usize,
}

#[derive(Debug)]
struct Node<V> {
    score: f64,
    value: V,
    links: Vec<Link>,
}

impl<V: Ord> Node<V> {
    /// True when this node sorts strictly before `(score, value)`
    fn precedes(&self, score: f64, value: &V) -> bool {
        match self.score.partial_cmp(&score) {
            Some(Ordering::Less) => true,
            Some(Ordering::Equal) => self.value < *value,
            _ => false,
        }
    }

    fn is(&self, score: f64, value: &V) -> bool {
        self.score == score && self.value == *value
    }
}

/// An ordered multiset of `(score, value)` entries with rank queries
#[derive(Debug)]
pub struct SkipList<V> {
    head: [Link; MAX_LEVEL],
    slots: Vec<Option<Node<V>>>,
    free: Vec<usize>,

    /// Levels currently in use (at least 1)
    level: usize,
    len: usize,
    levels: LevelGenerator,
}

impl<V: Ord> Default for SkipList<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Ord> SkipList<V> {
    pub fn new() -> Self {
        Self::with_expected_size(DEFAULT_EXPECTED_SIZE)
    }

    /// List whose height is capped for about `expected_size` entries
    pub fn with_expected_size(expected_size: usize) -> Self {
        Self::from_generator(LevelGenerator::new(expected_size))
    }

    /// Deterministic list: the same seed yields the same node heights
    pub fn with_seed(expected_size: usize, seed: u64) -> Self {
        Self::from_generator(LevelGenerator::with_seed(expected_size, seed))
    }

    fn from_generator(levels: LevelGenerator) -> Self {
        Self {
            head: [Link::default(); MAX_LEVEL],
            slots: Vec::new(),
            free: Vec::new(),
            level: 1,
            len: 0,
            levels,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Height cap for new nodes
    pub fn max_level(&self) -> usize {
        self.levels.max_level()
    }

    pub fn clear(&mut self) {
        self.head = [Link::default(); MAX_LEVEL];
        self.slots.clear();
        self.free.clear();
        self.level = 1;
        self.len = 0;
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Insert an entry and return its 0-based rank
    ///
    /// NaN scores are rejected. Equal `(score, value)` pairs may coexist;
    /// deduplication is the caller's concern.
    pub fn insert(&mut self, score: f64, value: V) -> Result<usize> {
        if score.is_nan() {
            return Err(CorvidError::InvalidArgument("score is NaN".to_string()));
        }

        let mut update = [HEAD; MAX_LEVEL];
        let mut rank = [0usize; MAX_LEVEL];
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            rank[i] = if i + 1 == self.level { 0 } else { rank[i + 1] };
            while let Some(next) = self.links(x)[i].next {
                if !self.node(next).precedes(score, &value) {
                    break;
                }
                rank[i] += self.links(x)[i].width;
                x = next;
            }
            update[i] = x;
        }

        let height = self.levels.next_level();
        if height > self.level {
            for i in self.level..height {
                rank[i] = 0;
                update[i] = HEAD;
                self.head[i] = Link {
                    next: None,
                    width: self.len,
                };
            }
            self.level = height;
        }

        let idx = self.alloc(Node {
            score,
            value,
            links: vec![Link::default(); height],
        });

        for i in 0..height {
            let before = self.links(update[i])[i];
            let skipped = rank[0] - rank[i];
            self.node_mut(idx).links[i] = Link {
                next: before.next,
                width: before.width - skipped,
            };
            self.links_mut(update[i])[i] = Link {
                next: Some(idx),
                width: skipped + 1,
            };
        }
        for i in height..self.level {
            self.links_mut(update[i])[i].width += 1;
        }
        self.len += 1;
        Ok(rank[0])
    }

    /// Remove one entry equal to `(score, value)`
    pub fn remove(&mut self, score: f64, value: &V) -> bool {
        let (update, candidate) = self.search(|node| node.precedes(score, value));
        match candidate {
            Some(idx) if self.node(idx).is(score, value) => {
                self.unlink(idx, &update);
                true
            }
            _ => false,
        }
    }

    /// Remove and return the first entry
    pub fn pop_first(&mut self) -> Option<(f64, V)> {
        let first = self.head[0].next?;
        Some(self.unlink(first, &[HEAD; MAX_LEVEL]))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// 0-based rank of `(score, value)`, if present
    pub fn rank(&self, score: f64, value: &V) -> Option<usize> {
        let mut traversed = 0;
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.links(x)[i].next {
                let node = self.node(next);
                if !(node.precedes(score, value) || node.is(score, value)) {
                    break;
                }
                traversed += self.links(x)[i].width;
                x = next;
            }
            if x != HEAD && self.node(x).is(score, value) {
                return Some(traversed - 1);
            }
        }
        None
    }

    /// Entry at a 0-based rank
    pub fn get_by_rank(&self, rank: usize) -> Option<(f64, &V)> {
        self.index_at(rank).map(|idx| self.entry(idx))
    }

    /// Entries with 0-based ranks in `start..=stop`, clamped to the list
    pub fn range_by_rank(&self, start: usize, stop: usize) -> Vec<(f64, &V)> {
        if start >= self.len || start > stop {
            return Vec::new();
        }
        let stop = stop.min(self.len - 1);
        let mut out = Vec::with_capacity(stop - start + 1);
        let mut cursor = self.index_at(start);
        while let Some(idx) = cursor {
            if out.len() > stop - start {
                break;
            }
            out.push(self.entry(idx));
            cursor = self.node(idx).links[0].next;
        }
        out
    }

    /// Entries with `min <= score <= max`, ascending
    pub fn range_by_score(&self, min: f64, max: f64) -> Vec<(f64, &V)> {
        let (_, mut cursor) = self.search(|node| node.score < min);
        let mut out = Vec::new();
        while let Some(idx) = cursor {
            let node = self.node(idx);
            if node.score > max {
                break;
            }
            out.push((node.score, &node.value));
            cursor = node.links[0].next;
        }
        out
    }

    pub fn first(&self) -> Option<(f64, &V)> {
        self.head[0].next.map(|idx| self.entry(idx))
    }

    /// Entries in ascending order
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            list: self,
            next: self.head[0].next,
            remaining: self.len,
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn node(&self, idx: usize) -> &Node<V> {
        match self.slots.get(idx) {
            Some(Some(node)) => node,
            _ => unreachable!("dangling skiplist index {}", idx),
        }
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<V> {
        match self.slots.get_mut(idx) {
            Some(Some(node)) => node,
            _ => unreachable!("dangling skiplist index {}", idx),
        }
    }

    fn links(&self, idx: usize) -> &[Link] {
        if idx == HEAD {
            &self.head
        } else {
            &self.node(idx).links
        }
    }

    fn links_mut(&mut self, idx: usize) -> &mut [Link] {
        if idx == HEAD {
            &mut self.head
        } else {
            &mut self.node_mut(idx).links
        }
    }

    fn entry(&self, idx: usize) -> (f64, &V) {
        let node = self.node(idx);
        (node.score, &node.value)
    }

    fn alloc(&mut self, node: Node<V>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    /// Descend while `before` holds for the next node
    ///
    /// Returns the last node visited at each level and the first node at
    /// the base level for which `before` is false.
    fn search(&self, before: impl Fn(&Node<V>) -> bool) -> ([usize; MAX_LEVEL], Option<usize>) {
        let mut update = [HEAD; MAX_LEVEL];
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.links(x)[i].next {
                if !before(self.node(next)) {
                    break;
                }
                x = next;
            }
            update[i] = x;
        }
        (update, self.links(x)[0].next)
    }

    /// 0-based rank to arena index
    fn index_at(&self, rank: usize) -> Option<usize> {
        if rank >= self.len {
            return None;
        }
        let target = rank + 1;
        let mut traversed = 0;
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.links(x)[i].next {
                let width = self.links(x)[i].width;
                if traversed + width > target {
                    break;
                }
                traversed += width;
                x = next;
            }
            if traversed == target {
                return Some(x);
            }
        }
        None
    }

    /// Detach `idx`, given the predecessor at every level
    fn unlink(&mut self, idx: usize, update: &[usize; MAX_LEVEL]) -> (f64, V) {
        for i in 0..self.level {
            let owned = self.node(idx).links.get(i).copied();
            let link = &mut self.links_mut(update[i])[i];
            match owned {
                Some(own) if link.next == Some(idx) => {
                    link.width = link.width + own.width - 1;
                    link.next = own.next;
                }
                _ => link.width -= 1,
            }
        }

        while self.level > 1 && self.head[self.level - 1].next.is_none() {
            self.level -= 1;
        }
        self.len -= 1;

        let node = match self.slots[idx].take() {
            Some(node) => node,
            None => unreachable!("dangling skiplist index {}", idx),
        };
        self.free.push(idx);
        (node.score, node.value)
    }
}

/// Ascending iterator over a skiplist
pub struct Iter<'a, V> {
    list: &'a SkipList<V>,
    next: Option<usize>,
    remaining: usize,
}

impl<'a, V: Ord> Iterator for Iter<'a, V> {
    type Item = (f64, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.next?;
        let node = self.list.node(idx);
        self.next = node.links[0].next;
        self.remaining -= 1;
        Some((node.score, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, V: Ord> ExactSizeIterator for Iter<'a, V> {}

impl<'a, V: Ord> IntoIterator for &'a SkipList<V> {
    type Item = (f64, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Iter<'a, V> {
        self.iter()
    }
}
