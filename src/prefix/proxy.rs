//! Key prefixer
//!
//! Rewrites key arguments so one physical keyspace holds many logical ones,
//! and strips the prefix back off keys that come back in replies.

use crate::error::{CorvidError, Result};
use crate::protocol::{Cmd, Value};
use super::rules::{key_rule, reply_keys, KeyRule, ReplyKeys, ScopedCommand};

/// Characters with meaning in server glob patterns
const GLOB_SPECIAL: &[u8] = b"*?[]\\";

/// A command after prefixing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// Send this command instead
    Command(Cmd),

    /// Emulate an administrative command over keys matching `pattern`
    Scoped {
        command: ScopedCommand,
        pattern: Vec<u8>,
    },
}

/// Applies one key prefix to commands and replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPrefixer {
    prefix: Vec<u8>,
}

impl KeyPrefixer {
    pub fn new(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// A prefixer for a namespace nested inside this one
    pub fn nested(&self, inner: &[u8]) -> Self {
        Self::new([self.prefix.as_slice(), inner].concat())
    }

    pub fn prefix_key(&self, key: &[u8]) -> Vec<u8> {
        [self.prefix.as_slice(), key].concat()
    }

    /// The logical key, if `key` lives under this prefix
    pub fn strip_key<'a>(&self, key: &'a [u8]) -> Option<&'a [u8]> {
        key.strip_prefix(self.prefix.as_slice())
    }

    /// Glob pattern matching `pattern` inside this namespace
    pub fn match_pattern(&self, pattern: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix.len() * 2 + pattern.len());
        for &b in &self.prefix {
            if GLOB_SPECIAL.contains(&b) {
                out.push(b'\\');
            }
            out.push(b);
        }
        out.extend_from_slice(pattern);
        out
    }

    /// Prefix the key arguments of a command
    pub fn rewrite(&self, command: &Cmd) -> Result<Rewrite> {
        let name = command.name();
        let mut args = command.as_args().to_vec();
        let params = args.get_mut(1..).unwrap_or_default();
        let len = params.len();

        match key_rule(&name) {
            KeyRule::NoKeys => {}
            KeyRule::First => self.prefix_range(params, 0, len.min(1)),
            KeyRule::FirstN(n) => self.prefix_range(params, 0, len.min(n)),
            KeyRule::All => self.prefix_range(params, 0, len),
            KeyRule::Alternating => {
                for key in params.iter_mut().step_by(2) {
                    *key = self.prefix_key(key);
                }
            }
            KeyRule::AllButLast => self.prefix_range(params, 0, len.saturating_sub(1)),
            KeyRule::NumKeys { leading, numkeys_at } => {
                self.prefix_range(params, 0, leading.min(len));
                let numkeys = parse_numkeys(&name, params.get(numkeys_at))?;
                let first = numkeys_at + 1;
                let Some(end) = first.checked_add(numkeys).filter(|&end| end <= len) else {
                    return Err(CorvidError::InvalidArgument(format!(
                        "{} declares {} keys but has {} arguments after the count",
                        name,
                        numkeys,
                        len.saturating_sub(first)
                    )));
                };
                self.prefix_range(params, first, end);
            }
            KeyRule::Streams => {
                let streams = params
                    .iter()
                    .position(|p| p.eq_ignore_ascii_case(b"STREAMS"))
                    .ok_or_else(|| {
                        CorvidError::InvalidArgument(format!("{} without STREAMS", name))
                    })?;
                let first = streams + 1;
                let keys = (len - first) / 2;
                self.prefix_range(params, first, first + keys);
            }
            KeyRule::Pattern => {
                if let Some(pattern) = params.first_mut() {
                    *pattern = self.match_pattern(pattern);
                }
            }
            KeyRule::Scan => {
                let matched = params
                    .iter()
                    .position(|p| p.eq_ignore_ascii_case(b"MATCH"))
                    .filter(|&i| i + 1 < len);
                match matched {
                    Some(i) => params[i + 1] = self.match_pattern(&params[i + 1]),
                    None => {
                        args.push(b"MATCH".to_vec());
                        args.push(self.match_pattern(b"*"));
                    }
                }
            }
            KeyRule::Scoped(command) => {
                return Ok(Rewrite::Scoped {
                    command,
                    pattern: self.match_pattern(b"*"),
                })
            }
            KeyRule::Denied => return Err(CorvidError::CommandNotAllowed(name)),
        }

        Ok(Rewrite::Command(Cmd::from_args(args)))
    }

    /// Remove the prefix from keys carried in a reply
    pub fn strip_reply(&self, command: &str, reply: Value) -> Value {
        match (reply_keys(command), reply) {
            (ReplyKeys::Elements, Value::Array(items)) => {
                Value::Array(items.into_iter().map(|v| self.strip_value(v)).collect())
            }
            (ReplyKeys::ScanPage, Value::Array(mut page)) if page.len() == 2 => {
                if let Value::Array(keys) = page.pop().unwrap_or(Value::Nil) {
                    page.push(Value::Array(
                        keys.into_iter().map(|v| self.strip_value(v)).collect(),
                    ));
                }
                Value::Array(page)
            }
            (ReplyKeys::FirstElement, Value::Array(mut items)) if !items.is_empty() => {
                let key = std::mem::replace(&mut items[0], Value::Nil);
                items[0] = self.strip_value(key);
                Value::Array(items)
            }
            (_, reply) => reply,
        }
    }

    fn strip_value(&self, value: Value) -> Value {
        match value {
            Value::BulkString(data) if data.starts_with(&self.prefix) => {
                Value::BulkString(data.slice(self.prefix.len()..))
            }
            other => other,
        }
    }

    fn prefix_range(&self, params: &mut [Vec<u8>], start: usize, end: usize) {
        for key in &mut params[start..end] {
            *key = self.prefix_key(key);
        }
    }
}

fn parse_numkeys(name: &str, arg: Option<&Vec<u8>>) -> Result<usize> {
    arg.and_then(|a| std::str::from_utf8(a).ok())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CorvidError::InvalidArgument(format!("{} is missing a valid key count", name)))
}
