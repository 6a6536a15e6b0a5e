//! Request
//!
//! One command's trip through a connection, as an explicit state machine:
//!
//! ```text
//! Created ──▶ Sent ──▶ Complete
//!               │
//!               ▼
//!            Failed ──▶ RetryPending ──▶ Sent   (while the retry budget lasts)
//! ```
//!
//! Only failures to connect or to write are retried: the server cannot have
//! run a command it never received. Once bytes may have reached the server
//! (a failure while reading the reply) the error is surfaced as-is.

use crate::config::RetryPolicy;
use crate::connection::Connection;
use crate::error::{CorvidError, Result};
use crate::protocol::{Cmd, Value};

/// Where a request is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Created,
    Sent,
    Complete,
    Failed,
    RetryPending,
}

/// Which step of an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connect,
    Send,
    Receive,
}

/// A single command and its reply
#[derive(Debug)]
pub struct Request {
    command: Cmd,
    state: RequestState,
    policy: RetryPolicy,
    retries: u32,
    response: Option<Value>,
}

impl Request {
    pub fn new(command: Cmd, policy: RetryPolicy) -> Self {
        Self {
            command,
            state: RequestState::Created,
            policy,
            retries: 0,
            response: None,
        }
    }

    pub fn command(&self) -> &Cmd {
        &self.command
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Retries performed so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// The reply, once complete
    pub fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }

    /// Drive the request to completion on `conn`
    ///
    /// Server error replies complete the request normally; they are part of
    /// the returned value.
    pub fn run(&mut self, conn: &mut Connection) -> Result<Value> {
        if let Some(response) = &self.response {
            return Ok(response.clone());
        }

        loop {
            match self.attempt(conn) {
                Ok(value) => {
                    self.state = RequestState::Complete;
                    self.response = Some(value.clone());
                    return Ok(value);
                }
                Err((phase, err)) => {
                    self.state = RequestState::Failed;
                    if !self.should_retry(phase, &err) {
                        return Err(err);
                    }
                    self.state = RequestState::RetryPending;
                    self.retries += 1;
                    tracing::warn!(
                        "{} failed during {:?} on connection {}: {}; reconnecting (retry {} of {})",
                        self.command.name(),
                        phase,
                        conn.id(),
                        err,
                        self.retries,
                        self.policy.max_retries
                    );
                    conn.disconnect();
                }
            }
        }
    }

    fn attempt(&mut self, conn: &mut Connection) -> std::result::Result<Value, (Phase, CorvidError)> {
        conn.connect().map_err(|e| (Phase::Connect, e))?;
        conn.send_command(&self.command).map_err(|e| (Phase::Send, e))?;
        self.state = RequestState::Sent;
        conn.read_reply().map_err(|e| (Phase::Receive, e))
    }

    fn should_retry(&self, phase: Phase, err: &CorvidError) -> bool {
        if self.retries >= self.policy.max_retries {
            return false;
        }
        match phase {
            Phase::Connect | Phase::Send => matches!(
                err,
                CorvidError::Io(_) | CorvidError::ConnectionClosed | CorvidError::Timeout
            ),
            Phase::Receive => false,
        }
    }
}
