//! Prefix Module
//!
//! Multi-tenant namespacing: every key a command touches is rewritten to
//! live under a fixed prefix, and keys in replies are mapped back.
//!
//! ## Rewrite Strategies
//! - first argument (default)
//! - every argument (set algebra, multi-key reads and deletes)
//! - alternating arguments (`MSET key value ...`)
//! - all but the trailing timeout (blocking pops)
//! - leading keys plus a `numkeys` count (scripts, aggregate stores)
//!
//! Administrative commands that act on the whole database are emulated over
//! the prefixed keyspace (`FLUSHDB` deletes only matching keys) or refused.

mod proxy;
mod rules;

pub use proxy::{KeyPrefixer, Rewrite};
pub use rules::{key_rule, reply_keys, KeyRule, ReplyKeys, ScopedCommand};
