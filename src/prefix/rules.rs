//! Key rules
//!
//! Which arguments of each command are keys, and which replies carry keys.

/// How a command's arguments are rewritten under a prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRule {
    /// No key arguments
    NoKeys,

    /// First argument is the only key (the default)
    First,

    /// The first `n` arguments are keys
    FirstN(usize),

    /// Every argument is a key
    All,

    /// Keys and values alternate, key first
    Alternating,

    /// Every argument but the trailing timeout is a key
    AllButLast,

    /// `leading` keys, then a key count at `numkeys_at`, then that many keys
    NumKeys { leading: usize, numkeys_at: usize },

    /// Keys follow the `STREAMS` keyword, paired with as many ids
    Streams,

    /// `KEYS pattern`
    Pattern,

    /// `SCAN cursor [MATCH pattern] ...`
    Scan,

    /// Administrative command replaced by a prefix-scoped equivalent
    Scoped(ScopedCommand),

    /// Cannot be confined to a prefix
    Denied,
}

/// Administrative commands emulated over the prefixed keyspace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopedCommand {
    /// FLUSHDB / FLUSHALL: delete keys under the prefix
    Flush,

    /// DBSIZE: count keys under the prefix
    DbSize,
}

/// Where keys appear in a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKeys {
    None,

    /// Every element of an array reply (KEYS)
    Elements,

    /// Second element of `[cursor, [keys]]` (SCAN)
    ScanPage,

    /// First element of an array reply (blocking pops)
    FirstElement,
}

/// Look up the rewrite rule for an upper-cased command name
pub fn key_rule(command: &str) -> KeyRule {
    match command {
        // Connection, server and transaction commands without keys
        "PING" | "ECHO" | "INFO" | "TIME" | "MULTI" | "EXEC" | "DISCARD" | "UNWATCH"
        | "SCRIPT" | "AUTH" | "CLIENT" | "HELLO" | "QUIT" | "COMMAND" | "LASTSAVE" | "ROLE"
        | "PUBLISH" | "WAIT" => KeyRule::NoKeys,

        // Every argument is a key
        "DEL" | "UNLINK" | "EXISTS" | "TOUCH" | "WATCH" | "MGET" | "RENAME" | "RENAMENX"
        | "RPOPLPUSH" | "SDIFF" | "SDIFFSTORE" | "SINTER" | "SINTERSTORE" | "SUNION"
        | "SUNIONSTORE" | "PFCOUNT" | "PFMERGE" => KeyRule::All,

        // key value key value ...
        "MSET" | "MSETNX" => KeyRule::Alternating,

        // key... timeout
        "BLPOP" | "BRPOP" | "BRPOPLPUSH" | "BZPOPMIN" | "BZPOPMAX" => KeyRule::AllButLast,

        // source destination [options]
        "SMOVE" | "LMOVE" | "BLMOVE" | "GEOSEARCHSTORE" | "ZRANGESTORE" | "COPY" => {
            KeyRule::FirstN(2)
        }

        // Scripted calls: script numkeys key...
        "EVAL" | "EVALSHA" | "EVAL_RO" | "EVALSHA_RO" | "FCALL" | "FCALL_RO" => {
            KeyRule::NumKeys { leading: 0, numkeys_at: 1 }
        }

        // Aggregate stores: destination numkeys key...
        "ZUNIONSTORE" | "ZINTERSTORE" | "ZDIFFSTORE" => KeyRule::NumKeys { leading: 1, numkeys_at: 1 },

        // numkeys key...
        "ZUNION" | "ZINTER" | "ZDIFF" | "ZINTERCARD" | "SINTERCARD" | "LMPOP" | "ZMPOP" => {
            KeyRule::NumKeys { leading: 0, numkeys_at: 0 }
        }

        // timeout numkeys key...
        "BLMPOP" | "BZMPOP" => KeyRule::NumKeys { leading: 0, numkeys_at: 1 },

        "XREAD" | "XREADGROUP" => KeyRule::Streams,

        "KEYS" => KeyRule::Pattern,
        "SCAN" => KeyRule::Scan,

        "FLUSHDB" | "FLUSHALL" => KeyRule::Scoped(ScopedCommand::Flush),
        "DBSIZE" => KeyRule::Scoped(ScopedCommand::DbSize),

        // Global or cross-database operations
        "SELECT" | "SWAPDB" | "MOVE" | "MIGRATE" | "CONFIG" | "DEBUG" | "SHUTDOWN"
        | "RANDOMKEY" | "OBJECT" | "SORT" | "SORT_RO" | "MONITOR" | "SAVE" | "BGSAVE"
        | "BGREWRITEAOF" | "REPLICAOF" | "SLAVEOF" | "FUNCTION" | "MODULE" | "ACL" => KeyRule::Denied,

        _ => KeyRule::First,
    }
}

/// Look up where a command's reply carries keys
pub fn reply_keys(command: &str) -> ReplyKeys {
    match command {
        "KEYS" => ReplyKeys::Elements,
        "SCAN" => ReplyKeys::ScanPage,
        "BLPOP" | "BRPOP" | "BZPOPMIN" | "BZPOPMAX" | "LMPOP" | "BLMPOP" | "ZMPOP" | "BZMPOP" => {
            ReplyKeys::FirstElement
        }
        _ => ReplyKeys::None,
    }
}
