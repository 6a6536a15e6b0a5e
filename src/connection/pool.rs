//! Connection Pool
//!
//! A bounded set of reusable connections.
//!
//! ## Invariants
//! - `created = available + in_use`
//! - `created <= max_connections`
//! - a connection is in exactly one of `available` or checked out
//!
//! Checkout never waits: when every slot is taken the caller gets
//! `PoolExhausted` and applies its own backpressure.
//!
//! `disconnect()` closes idle connections at once. Checkouts from before
//! the teardown keep their slot until released, and their socket is closed
//! the next time the holder touches it.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{CorvidError, Result};
use super::transport::{Connector, StdConnector};
use super::Connection;

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub created: usize,
    pub available: usize,
    pub in_use: usize,
    pub max_connections: usize,
}

/// Bookkeeping guarded by the pool mutex
struct PoolState {
    /// Idle connections, most recently released last
    available: Vec<Connection>,

    /// Connections currently checked out
    in_use: usize,

    /// Connections counted against the limit
    created: usize,
}

struct PoolInner {
    config: Arc<Config>,
    connector: Arc<dyn Connector>,
    state: Mutex<PoolState>,
    next_id: AtomicU64,

    /// Bumped by `disconnect()` while the state lock is held
    generation: AtomicU64,
}

/// Connection pool handle (cheap to clone)
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool that opens real sockets
    pub fn new(config: Config) -> Self {
        Self::with_connector(config, Arc::new(StdConnector))
    }

    /// Create a pool with a custom transport connector
    pub fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Self {
        let state = PoolState {
            available: Vec::with_capacity(config.max_connections.min(64)),
            in_use: 0,
            created: 0,
        };
        Self {
            inner: Arc::new(PoolInner {
                config: Arc::new(config),
                connector,
                state: Mutex::new(state),
                next_id: AtomicU64::new(1),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Check out a connection
    ///
    /// Reuses an idle connection when one exists, otherwise creates one if
    /// below the limit. New connections are not connected yet; the first
    /// request connects them.
    pub fn get_connection(&self) -> Result<PooledConnection> {
        let mut state = self.inner.state.lock();
        let generation = self.inner.generation.load(Ordering::Acquire);

        let conn = match state.available.pop() {
            Some(conn) => conn,
            None => {
                let max = self.inner.config.max_connections;
                if state.created >= max {
                    tracing::debug!("Pool exhausted: {} of {} connections in use", state.in_use, max);
                    return Err(CorvidError::PoolExhausted { max });
                }
                state.created += 1;
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Pool creating connection {} ({} of {})", id, state.created, max);
                Connection::new(id, Arc::clone(&self.inner.config), Arc::clone(&self.inner.connector))
            }
        };
        state.in_use += 1;
        drop(state);

        Ok(PooledConnection {
            pool: Arc::clone(&self.inner),
            conn: Some(conn),
            generation,
        })
    }

    /// Return a connection to the pool
    ///
    /// Equivalent to dropping the guard.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Disconnect every connection
    ///
    /// Idle connections are closed now. Checked-out connections stay
    /// counted against the limit until released; each one's socket is
    /// closed on its holder's next use and the connection is discarded on
    /// release.
    pub fn disconnect(&self) {
        let mut state = self.inner.state.lock();
        let closing = state.available.len();
        for conn in state.available.iter_mut() {
            conn.disconnect();
        }
        state.available.clear();
        state.created = state.in_use;
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        tracing::info!(
            "Pool disconnected: {} idle closed, {} in use will close on next use",
            closing,
            state.in_use
        );
    }

    /// Current counters
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            created: state.created,
            available: state.available.len(),
            in_use: state.in_use,
            max_connections: self.inner.config.max_connections,
        }
    }
}

impl PoolInner {
    fn return_connection(&self, mut conn: Connection, generation: u64) {
        // A request abandoned mid-reply leaves bytes in flight; never reuse that socket
        if conn.has_outstanding_replies() {
            tracing::warn!("Connection {} released with replies outstanding, disconnecting", conn.id());
            conn.disconnect();
        }

        let mut state = self.state.lock();
        state.in_use = state.in_use.saturating_sub(1);
        if self.is_stale(generation) {
            state.created = state.created.saturating_sub(1);
            drop(state);
            tracing::debug!("Connection {} outlived pool teardown, closing", conn.id());
            conn.disconnect();
            return;
        }
        state.available.push(conn);
    }

    fn is_stale(&self, generation: u64) -> bool {
        generation != self.generation.load(Ordering::Acquire)
    }
}

/// RAII checkout returning its connection to the pool on drop
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    generation: u64,
}

impl PooledConnection {
    fn conn(&self) -> &Connection {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection taken before drop"),
        }
    }

    fn conn_mut(&mut self) -> &mut Connection {
        let stale = self.pool.is_stale(self.generation);
        match &mut self.conn {
            Some(conn) => {
                // The pool was torn down while this checkout was out
                if stale && conn.is_connected() {
                    tracing::debug!("Connection {} closed by pool teardown", conn.id());
                    conn.disconnect();
                }
                conn
            }
            None => unreachable!("connection taken before drop"),
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn()
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn_mut()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.return_connection(conn, self.generation);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .field("generation", &self.generation)
            .finish()
    }
}
