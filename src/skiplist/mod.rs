//! Skiplist Module
//!
//! In-process sorted structures, usable without a server connection.
//!
//! - `SkipList`: ordered `(score, value)` entries with O(log n) rank queries
//! - `OrderedSet`: unique values with scores, built on `SkipList`
//!
//! Node heights are geometric with p = 1/2, capped at
//! `1 + log2(expected_size)` levels.

mod level;
mod list;
mod ordered_set;

pub use level::{level_cap, LevelGenerator, MAX_LEVEL};
pub use list::{Iter, SkipList};
pub use ordered_set::{InsertOutcome, OrderedSet};
