//! Pipeline
//!
//! Many commands sent in one write, replies matched back in FIFO order.
//!
//! ## Transaction Mode
//!
//! ```text
//! MULTI            → +OK        (consumed)
//! cmd 1..n         → +QUEUED    (consumed, errors remembered)
//! EXEC             → *n results (returned, one per command)
//! ```
//!
//! A pipeline is never retried: some of its commands may already have run.
//! When the socket fails partway through, replies already read are kept and
//! every command still waiting gets its own error.

use std::collections::HashSet;

use crate::connection::Connection;
use crate::error::{CorvidError, Result};
use crate::prefix::Rewrite;
use crate::protocol::{pack_commands, Cmd, ReplyError, ToArg, Value};
use super::client::Client;

/// One queued command and the name its reply is interpreted under
#[derive(Debug)]
struct Queued {
    name: String,
    command: Cmd,
    script: Option<String>,
}

/// A batch of commands run in a single round trip
#[derive(Debug)]
pub struct Pipeline {
    client: Client,
    queued: Vec<Queued>,
    atomic: bool,

    /// First error raised while queueing, reported by `execute`
    error: Option<CorvidError>,
}

impl Pipeline {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            queued: Vec::new(),
            atomic: false,
            error: None,
        }
    }

    /// Wrap the batch in MULTI/EXEC
    pub fn atomic(&mut self) -> &mut Self {
        self.atomic = true;
        self
    }

    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    /// Queue a command
    pub fn queue(&mut self, command: Cmd) -> &mut Self {
        let name = command.name();
        match self.client.rewrite(&command) {
            Ok(Rewrite::Command(command)) => self.queued.push(Queued {
                name,
                command,
                script: None,
            }),
            Ok(Rewrite::Scoped { .. }) => self.fail(CorvidError::CommandNotAllowed(name)),
            Err(e) => self.fail(e),
        }
        self
    }

    /// Queue a registered script call
    ///
    /// Scripts the connection has not loaded yet are loaded before the
    /// batch is sent.
    pub fn script<K: ToArg, A: ToArg>(&mut self, name: &str, keys: &[K], args: &[A]) -> &mut Self {
        let keys = self.client.prefix_keys(keys);
        let command = match self.client.registry().get(name) {
            Ok(script) => script.evalsha(&keys, args),
            Err(e) => {
                self.fail(e);
                return self;
            }
        };
        self.queued.push(Queued {
            name: "EVALSHA".to_string(),
            command,
            script: Some(name.to_string()),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Drop everything queued so far
    pub fn clear(&mut self) {
        self.queued.clear();
        self.error = None;
    }

    /// Send the batch and collect one result per queued command
    ///
    /// The outer error covers failures before anything was sent (queueing
    /// errors, checkout, connect, script loads) and whole-transaction
    /// outcomes such as `TransactionAborted`. Once the batch is on the wire
    /// each command gets its own result: server errors become
    /// `Err(Reply)`, and commands whose replies were lost with the
    /// connection get a connection error. The connection is closed in that
    /// case.
    pub fn execute(&mut self) -> Result<Vec<Result<Value>>> {
        let queued = std::mem::take(&mut self.queued);
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        if queued.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.client.checkout()?;
        conn.connect()?;

        let registry = self.client.registry();
        let mut loaded = HashSet::new();
        for script in queued.iter().filter_map(|q| q.script.as_deref()) {
            if loaded.insert(script) {
                registry.ensure_loaded(&mut conn, script)?;
            }
        }

        let multi = Cmd::new("MULTI");
        let exec = Cmd::new("EXEC");
        let commands = queued.iter().map(|q| &q.command);
        let packed = if self.atomic {
            pack_commands(std::iter::once(&multi).chain(commands).chain(std::iter::once(&exec)))
        } else {
            pack_commands(commands)
        };
        let replies = queued.len() + if self.atomic { 2 } else { 0 };

        tracing::debug!(
            "Pipeline of {} commands on connection {}{}",
            queued.len(),
            conn.id(),
            if self.atomic { " (transaction)" } else { "" }
        );

        let results = match conn.send_packed(&packed, replies) {
            Err(e) => unanswered(Vec::new(), queued.len(), e),
            Ok(()) if self.atomic => read_transaction(&mut conn, queued.len())?,
            Ok(()) => read_replies(&mut conn, queued.len()),
        };

        for (q, reply) in queued.iter().zip(&results) {
            if let Ok(reply) = reply {
                self.client.observe(&mut conn, &q.command, reply);
            }
        }

        Ok(queued
            .iter()
            .zip(results)
            .map(|(q, slot)| {
                slot.and_then(Value::into_result)
                    .map(|reply| self.client.strip(&q.name, reply))
            })
            .collect())
    }

    fn fail(&mut self, err: CorvidError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

/// Read one reply per command, stopping at the first transport failure
fn read_replies(conn: &mut Connection, count: usize) -> Vec<Result<Value>> {
    let mut results = Vec::with_capacity(count);
    while results.len() < count {
        match conn.read_reply() {
            Ok(reply) => results.push(Ok(reply)),
            Err(e) => return unanswered(results, count, e),
        }
    }
    results
}

/// Read the MULTI/QUEUED/EXEC replies of a transaction
///
/// Until the EXEC reply is read nothing is known about what ran, so a
/// transport failure anywhere leaves every command unanswered.
fn read_transaction(conn: &mut Connection, count: usize) -> Result<Vec<Result<Value>>> {
    let (opened, rejected, committed) = match read_brackets(conn, count) {
        Ok(replies) => replies,
        Err(e) => return Ok(unanswered(Vec::new(), count, e)),
    };
    if let Value::Error(err) = opened {
        return Err(CorvidError::Reply(err));
    }

    match committed {
        Value::Array(results) if results.len() == count => Ok(results.into_iter().map(Ok).collect()),
        Value::Array(results) => Err(CorvidError::Protocol(format!(
            "EXEC returned {} results for {} commands",
            results.len(),
            count
        ))),
        Value::Nil => Err(CorvidError::TransactionAborted),
        Value::Error(err) => {
            tracing::debug!("Transaction discarded: {}", err);
            Ok(rejected
                .into_iter()
                .map(|own| Ok(Value::Error(own.unwrap_or_else(|| err.clone()))))
                .collect())
        }
        other => Err(CorvidError::Protocol(format!(
            "unexpected EXEC reply: {}",
            other.kind()
        ))),
    }
}

fn read_brackets(conn: &mut Connection, count: usize) -> Result<(Value, Vec<Option<ReplyError>>, Value)> {
    let opened = conn.read_reply()?;

    let mut rejected = Vec::with_capacity(count);
    for _ in 0..count {
        rejected.push(match conn.read_reply()? {
            Value::Error(err) => Some(err),
            _ => None,
        });
    }

    let committed = conn.read_reply()?;
    Ok((opened, rejected, committed))
}

/// Fill the slots whose replies were never read
///
/// The first unanswered command carries the transport error itself.
fn unanswered(mut results: Vec<Result<Value>>, count: usize, err: CorvidError) -> Vec<Result<Value>> {
    tracing::warn!(
        "Pipeline connection failed after {} of {} replies: {}",
        results.len(),
        count,
        err
    );
    let reason = err.to_string();
    results.push(Err(err));
    while results.len() < count {
        results.push(Err(CorvidError::NoReply(reason.clone())));
    }
    results
}
